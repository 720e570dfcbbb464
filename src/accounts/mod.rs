pub mod client;

pub use client::{AccountClient, AccountError, AccountView, ForwardedCredential};
