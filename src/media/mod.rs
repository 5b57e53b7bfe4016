pub mod catalog;
pub mod decoder;
pub mod library;
pub mod metadata;
pub mod mime;
pub mod source;
