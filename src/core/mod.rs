// Core modules implementing host storage, encoding, and error modeling.
pub mod codec;
pub mod error;
pub mod origin;
pub mod storage;
