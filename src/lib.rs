pub mod app;
pub mod bands;
pub mod capture;
pub mod config;
pub mod engine;
pub mod group;
pub mod prefs;
pub mod preset;
pub mod reactive;
pub mod ring_buffer;
pub mod spectrum;
pub mod terminal;
