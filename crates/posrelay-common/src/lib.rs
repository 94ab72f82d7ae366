pub mod codec;
pub mod player;
pub mod protocol;
