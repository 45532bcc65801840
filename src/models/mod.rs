pub mod actor;
pub mod genre;
pub mod hall;
pub mod movie;
pub mod order;
pub mod session;
pub mod user;

pub use actor::Actor;
pub use genre::Genre;
pub use hall::CinemaHall;
pub use movie::Movie;
pub use order::{Order, Ticket};
pub use session::MovieSession;
pub use user::User;
