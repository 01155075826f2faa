pub mod health;
pub mod history;
pub mod scripts;
pub mod sync;
pub mod webhook;
