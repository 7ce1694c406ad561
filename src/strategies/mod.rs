//! Trading Strategies Module

pub mod short_straddle;
