//! Registry of live order books, one per configured product

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use super::live::{LiveBook, Phase};
use crate::config::Config;
use crate::error::{QuoteError, Result};
use crate::feed::Feed;
use crate::rest::ApiClient;

/// Owns every live book, keyed by product id
pub struct Registry {
    books: HashMap<String, LiveBook>,
}

impl Registry {
    /// Create one live book per configured product against the shared feed
    pub async fn open(
        config: &Config,
        api: ApiClient,
        feed: &Feed,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut books = HashMap::new();
        for product_id in &config.products {
            let book = LiveBook::open(
                api.clone(),
                feed,
                product_id,
                config.resync_dropped_threshold,
                shutdown.clone(),
            )
            .await?;
            info!(product_id = %product_id, "live order book created");
            books.insert(product_id.clone(), book);
        }
        Ok(Self { books })
    }

    pub fn get(&self, product_id: &str) -> Option<&LiveBook> {
        self.books.get(product_id)
    }

    pub fn books(&self) -> impl Iterator<Item = &LiveBook> {
        self.books.values()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Product ids with a book that is not yet running
    pub fn not_running(&self) -> Vec<&str> {
        self.books
            .values()
            .filter(|book| book.phase() != Phase::Running)
            .map(|book| book.product_id())
            .collect()
    }

    /// Wait for every book to reach `running`; fails on the first one that
    /// misses the deadline.
    pub async fn wait_until_running(&self, deadline: Duration) -> Result<()> {
        for book in self.books.values() {
            book.wait_until_running(deadline).await?;
        }
        Ok(())
    }

    /// Spawn a drain task per book that logs every non-fatal engine error
    pub fn spawn_error_drains(&self) -> Result<()> {
        for book in self.books.values() {
            let product_id = book.product_id().to_string();
            let mut errors = book.take_errors().ok_or_else(|| {
                QuoteError::Internal(format!("error outlet for {product_id} already taken"))
            })?;
            tokio::spawn(async move {
                while let Some(err) = errors.recv().await {
                    error!(product_id = %product_id, error = %err, "order book error");
                }
            });
        }
        Ok(())
    }
}
