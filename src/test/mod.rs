pub mod utils;

mod api;
mod migrations;
