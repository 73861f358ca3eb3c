pub mod assets;
pub mod chat;
pub mod document;
pub mod errors;
pub mod events;
pub mod history;
pub mod models;
pub mod requests;
pub mod runs;
pub mod selection;
