//! Low-level primitives shared by kernel components.

#![no_std]

pub mod cell;
