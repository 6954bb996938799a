//! Domain services used by the websocket and HTTP routes.
//!
//! Service modules own session state and persistence concerns so route
//! handlers can stay focused on protocol translation.

pub mod board;
pub mod element;
pub mod persistence;
