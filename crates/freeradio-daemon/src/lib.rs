pub mod controller;
pub mod hls;
pub mod http;
pub mod media;
pub mod mpv;
pub mod proxy;
