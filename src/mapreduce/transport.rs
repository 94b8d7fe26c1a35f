//! Job dispatch to partition owners
//!
//! Every job, local or remote, answers with marshaled bytes so the
//! orchestrator always decodes partial results through the same codec.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::aggregator::LocalAggregator;
use super::errors::JobError;
use super::marshal::ResultMarshaler;
use super::types::AggregationJob;
use crate::storage::{NodeId, RowSource};

/// Submit-and-await contract for aggregation jobs
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Run `job` on `node` and return the encoded partial result
    async fn submit(&self, node: &NodeId, job: AggregationJob) -> Result<Vec<u8>, JobError>;
}

/// In-process transport running jobs directly against a row source
pub struct LocalTransport {
    aggregator: LocalAggregator,
    nodes: Option<HashSet<NodeId>>,
}

impl LocalTransport {
    /// Serve jobs addressed to any node
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self {
            aggregator: LocalAggregator::new(source),
            nodes: None,
        }
    }

    /// Serve only jobs addressed to `nodes`
    pub fn serving<I>(source: Arc<dyn RowSource>, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self {
            aggregator: LocalAggregator::new(source),
            nodes: Some(nodes.into_iter().collect()),
        }
    }

    fn serves(&self, node: &NodeId) -> bool {
        self.nodes.as_ref().map_or(true, |nodes| nodes.contains(node))
    }
}

#[async_trait]
impl JobTransport for LocalTransport {
    async fn submit(&self, node: &NodeId, job: AggregationJob) -> Result<Vec<u8>, JobError> {
        if !self.serves(node) {
            return Err(JobError::Transport {
                node: node.clone(),
                reason: "node is not served by this transport".to_string(),
            });
        }

        debug!("Running job for partition {} on {}", job.partition, node);
        let partial = self.aggregator.run(job).await?;
        Ok(ResultMarshaler::encode(&partial)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryCluster, PartitionId};
    use rust_decimal::Decimal;

    fn cluster() -> Arc<InMemoryCluster> {
        Arc::new(
            InMemoryCluster::builder()
                .partitions(2)
                .nodes(["node-a", "node-b"])
                .insert_fact(1, Decimal::new(500, 2))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_submit_returns_decodable_partial() {
        let transport = LocalTransport::new(cluster());
        let job = AggregationJob::new(PartitionId(1), 3);

        let bytes = transport.submit(&NodeId::new("node-b"), job).await.unwrap();
        let partial = ResultMarshaler::decode_for(&job, &bytes).unwrap();

        assert_eq!(partial.len(), 1);
        assert_eq!(partial.entries()[0].total, Decimal::new(500, 2));
    }

    #[tokio::test]
    async fn test_submit_to_unserved_node_fails() {
        let transport = LocalTransport::serving(cluster(), [NodeId::new("node-a")]);
        let err = transport
            .submit(&NodeId::new("node-b"), AggregationJob::new(PartitionId(1), 3))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Transport { .. }));
        assert!(err.is_retryable());
    }
}
