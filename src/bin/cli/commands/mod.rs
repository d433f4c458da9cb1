pub mod diff;
pub mod labels;
pub mod props;
pub mod push;
pub mod replay;
pub mod window;
