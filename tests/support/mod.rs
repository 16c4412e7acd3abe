#![allow(dead_code)]

pub mod fakes;
pub mod harness;
pub mod invoice;
pub mod port;
pub mod wait;
