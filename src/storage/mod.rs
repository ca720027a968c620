pub mod album;

pub use album::PhotoAlbum;
