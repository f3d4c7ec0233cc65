//! Batch orchestration.
//!
//! [`BatchCoordinator`] splits an ingredient list into contiguous chunks,
//! sends up to `concurrency` chunks at a time through a [`ChunkDispatcher`],
//! and reassembles the per-item results in input order. A failing chunk only
//! fails its own items.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY};
use crate::error::{ErrorInfo, ErrorKind, NutritionError, Result};
use crate::results::{BatchResult, ItemResult};

/// Sends one chunk of ingredients to the server.
#[async_trait]
pub trait ChunkDispatcher: Send + Sync + 'static {
    /// Analyze `items` in a single request.
    ///
    /// Results are matched to `items` by position. Returning fewer results
    /// than items is tolerated; the missing ones are reported as failures.
    async fn dispatch(&self, items: Vec<String>) -> Result<Vec<ItemResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCoordinator {
    chunk_size: usize,
    concurrency: usize,
    credits_per_item: u64,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            credits_per_item: 1,
        }
    }
}

type ChunkOutcome = (Vec<(usize, String)>, Result<Vec<ItemResult>>);

impl BatchCoordinator {
    pub fn new(chunk_size: usize, concurrency: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(NutritionError::validation("chunk size must be greater than 0"));
        }
        if concurrency == 0 {
            return Err(NutritionError::validation("concurrency must be greater than 0"));
        }
        Ok(Self {
            chunk_size,
            concurrency,
            credits_per_item: 1,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(config.chunk_size, config.concurrency)?
            .with_credits_per_item(config.credits_per_item))
    }

    pub fn with_credits_per_item(mut self, credits: u64) -> Self {
        self.credits_per_item = credits;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Analyze `ingredients`, returning exactly one result per input in order.
    pub async fn run(
        &self,
        dispatcher: Arc<dyn ChunkDispatcher>,
        ingredients: &[String],
    ) -> Result<BatchResult> {
        if ingredients.is_empty() {
            return Err(NutritionError::validation("ingredient list must not be empty"));
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; ingredients.len()];
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<ChunkOutcome> = JoinSet::new();
        let mut chunk_count = 0;

        for (chunk_index, chunk) in ingredients.chunks(self.chunk_size).enumerate() {
            chunk_count += 1;
            let start = chunk_index * self.chunk_size;

            let mut sent = Vec::with_capacity(chunk.len());
            for (offset, item) in chunk.iter().enumerate() {
                if item.trim().is_empty() {
                    slots[start + offset] = Some(ItemResult::failed(
                        item.clone(),
                        ErrorInfo::new(ErrorKind::Validation, "ingredient must not be empty"),
                    ));
                } else {
                    sent.push((start + offset, item.clone()));
                }
            }

            if sent.is_empty() {
                tracing::debug!("Chunk {} has no ingredients to send, skipping", chunk_index);
                continue;
            }

            let semaphore = semaphore.clone();
            let dispatcher = dispatcher.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                tracing::debug!("Dispatching chunk {} ({} items)", chunk_index, sent.len());
                let items = sent.iter().map(|(_, text)| text.clone()).collect();
                let outcome = dispatcher.dispatch(items).await;
                (sent, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (sent, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Its items stay empty and are filled in below.
                    tracing::error!("Batch chunk task failed: {}", e);
                    continue;
                }
            };

            match outcome {
                Ok(results) => {
                    if results.len() != sent.len() {
                        tracing::warn!(
                            "Batch response had {} results for {} items",
                            results.len(),
                            sent.len()
                        );
                    }
                    let mut results = results.into_iter();
                    for (index, text) in sent {
                        slots[index] = Some(results.next().unwrap_or_else(|| {
                            ItemResult::failed(
                                text,
                                ErrorInfo::new(ErrorKind::Api, "missing result in batch response"),
                            )
                        }));
                    }
                }
                Err(e) => {
                    tracing::warn!("Batch chunk of {} items failed: {}", sent.len(), e);
                    let info = ErrorInfo::from(&e);
                    for (index, text) in sent {
                        slots[index] = Some(ItemResult::failed(text, info.clone()));
                    }
                }
            }
        }

        let per_item = slots
            .into_iter()
            .zip(ingredients)
            .map(|(slot, ingredient)| {
                slot.unwrap_or_else(|| {
                    ItemResult::failed(
                        ingredient.clone(),
                        ErrorInfo::new(ErrorKind::Internal, "batch chunk did not complete"),
                    )
                })
            })
            .collect();

        let result = BatchResult::from_items(per_item, self.credits_per_item, chunk_count);
        tracing::debug!(
            "Batch of {} items done: success rate {:.2}, cache hit rate {:.2}",
            result.len(),
            result.success_rate,
            result.cache_hit_rate
        );
        Ok(result)
    }
}
