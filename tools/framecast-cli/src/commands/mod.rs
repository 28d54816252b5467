pub mod check;
pub mod export;
pub mod frame;
pub mod info;
pub mod validate;
