//! Relayer account nonce allocation
//!
//! One manager per (chain, signer). Allocation and broadcast happen under the
//! same lock so concurrent submissions never reuse or skip a nonce.

use alloy::primitives::Address;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::Chain;

pub struct NonceManager {
    chain: Chain,
    signer: Address,
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new(chain: Chain, signer: Address) -> Self {
        Self {
            chain,
            signer,
            next: Mutex::new(None),
        }
    }

    /// Run `send` with the next nonce for this signer.
    ///
    /// The nonce is taken from the cache, or from `fetch_pending` when the
    /// cache is empty. On success the cache moves to `nonce + 1`; on failure it
    /// is cleared so the next call resynchronises with the chain.
    pub async fn allocate<T, E, Fetch, FetchFut, Submit, SubmitFut>(
        &self,
        fetch_pending: Fetch,
        send: Submit,
    ) -> Result<T, E>
    where
        Fetch: FnOnce() -> FetchFut,
        FetchFut: Future<Output = Result<u64, E>>,
        Submit: FnOnce(u64) -> SubmitFut,
        SubmitFut: Future<Output = Result<T, E>>,
    {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let fetched = fetch_pending().await?;
                debug!(chain = %self.chain, signer = %self.signer, nonce = fetched, "Synced relayer nonce");
                fetched
            }
        };

        match send(nonce).await {
            Ok(value) => {
                *next = Some(nonce + 1);
                Ok(value)
            }
            Err(e) => {
                *next = None;
                Err(e)
            }
        }
    }
}
