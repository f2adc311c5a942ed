//! Headless core of a feed reader's subscription screens: a SQLite-backed
//! feed store, the drawer projection with change suppression, and OPML 2.0
//! import/export.

pub mod app;
pub mod config;
pub mod drawer;
pub mod opml;
pub mod storage;
pub mod util;
