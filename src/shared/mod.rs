pub(crate) mod error;
pub(crate) mod mutex_ext;
pub(crate) mod security;
