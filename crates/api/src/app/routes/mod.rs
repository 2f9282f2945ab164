pub mod system;
pub mod webhook;
