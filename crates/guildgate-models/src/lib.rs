pub mod channel;
pub mod gateway;
pub mod guild;
pub mod member;
pub mod role;
pub mod user;
