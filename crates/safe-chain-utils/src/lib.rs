mod home_dir;
mod rustls_provider;

pub use home_dir::find_safe_chain_home;
pub use rustls_provider::ensure_rustls_crypto_provider;
