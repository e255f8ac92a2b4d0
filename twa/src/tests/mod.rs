// Controller Engine Testing Module
#![cfg(test)]


pub mod packet_tests;
pub mod pool_tests;
pub mod queue_tests;
