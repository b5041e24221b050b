// vim: tw=80
//! Whole raid groups, running over in-memory metadata

mod util;

mod config;
mod rebuild;
mod recovery;
