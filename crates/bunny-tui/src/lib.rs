//! tbunny terminal UI library
//!
//! Wires the cluster manager and the view strategies to a ratatui front end.
//! The binary in `main.rs` only sets up the terminal and logging.

pub mod app;
pub mod data;
pub mod events;
pub mod form;
pub mod ui;
