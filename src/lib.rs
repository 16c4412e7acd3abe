pub mod config;
pub mod lightning;
pub mod logging;
pub mod onchain;
pub mod swap;

pub mod proto {
    pub mod v1 {
        tonic::include_proto!("onchain_ln_swap.v1");
    }
}
