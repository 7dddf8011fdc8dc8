pub mod health;
pub mod ui;
