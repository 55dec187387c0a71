//! Trading account module.

mod account_info;

pub use account_info::{AccountInfo, AccountSnapshot};

#[cfg(test)]
pub(crate) use account_info::tests::sample_account;
