pub mod cert;
pub mod health;
