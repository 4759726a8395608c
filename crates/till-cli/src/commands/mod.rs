pub mod common;
pub mod dead_letter;
pub mod integrity;
pub mod product;
pub mod requests;
pub mod sale;
pub mod settings;
pub mod shift;
pub mod sync;
pub mod user;
