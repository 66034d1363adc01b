pub mod command;
pub mod feedback;
pub mod models;
pub mod settings;
