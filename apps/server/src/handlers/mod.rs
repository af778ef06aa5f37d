pub mod admin;
pub mod booking;
pub mod employee;
pub mod health;
pub mod webhook;
