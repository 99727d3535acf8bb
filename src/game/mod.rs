pub mod avatar;
pub mod bonus;
pub mod constants;
pub mod game;
pub mod room;
pub mod world;
