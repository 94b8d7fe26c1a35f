//! CSV loading of invoice lines and customer records
//!
//! Invoice lines become fact rows keyed by customer id, with
//! `amount = unit_price * quantity` computed in exact decimal arithmetic.
//! Customers become the enrichment records of the attribute store.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::memory::{ClusterBuilder, InMemoryCluster};
use crate::storage::{
    error::{StorageError, StorageResult},
    types::{EntityAttributes, EntityKey, NodeId},
};

/// One invoice line as stored in `invoice_lines.csv`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLine {
    pub invoice_line_id: i64,
    pub customer_id: EntityKey,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl InvoiceLine {
    /// Total paid for this line
    pub fn amount(&self) -> StorageResult<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                StorageError::parse(format!(
                    "amount of invoice line {} overflows",
                    self.invoice_line_id
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceLineRecord {
    invoice_line_id: i64,
    customer_id: EntityKey,
    // parsed with Decimal::from_str_exact, never through f64
    unit_price: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct CustomerRecord {
    customer_id: EntityKey,
    first_name: String,
    last_name: String,
    city: String,
    country: String,
}

/// Parse invoice lines from CSV with a header row
pub fn read_invoice_lines<R: Read>(reader: R) -> StorageResult<Vec<InvoiceLine>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut lines = Vec::new();

    for record in csv_reader.deserialize::<InvoiceLineRecord>() {
        let record = record?;
        let unit_price = Decimal::from_str_exact(&record.unit_price).map_err(|e| {
            StorageError::parse(format!(
                "invalid unit price {:?} on invoice line {}: {}",
                record.unit_price, record.invoice_line_id, e
            ))
        })?;
        lines.push(InvoiceLine {
            invoice_line_id: record.invoice_line_id,
            customer_id: record.customer_id,
            unit_price,
            quantity: record.quantity,
        });
    }

    Ok(lines)
}

/// Parse customer records from CSV with a header row
pub fn read_customers<R: Read>(reader: R) -> StorageResult<Vec<(EntityKey, EntityAttributes)>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut customers = Vec::new();

    for record in csv_reader.deserialize::<CustomerRecord>() {
        let record = record?;
        let name = format!("{} {}", record.first_name, record.last_name);
        customers.push((
            record.customer_id,
            EntityAttributes::new(name.trim(), record.city, record.country),
        ));
    }

    Ok(customers)
}

/// Layout of the in-memory cluster built from CSV files
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    pub partitions: u32,
    pub nodes: Vec<NodeId>,
}

impl ClusterLayout {
    pub fn new(partitions: u32, node_count: usize) -> Self {
        Self {
            partitions,
            nodes: (0..node_count)
                .map(|i| NodeId::new(format!("node-{i}")))
                .collect(),
        }
    }
}

/// Load invoice lines and customers into a fresh cluster builder
pub fn populate<R1: Read, R2: Read>(
    builder: ClusterBuilder,
    invoice_lines: R1,
    customers: R2,
) -> StorageResult<ClusterBuilder> {
    let mut builder = builder;
    for line in read_invoice_lines(invoice_lines)? {
        builder = builder.insert_fact(line.customer_id, line.amount()?);
    }
    for (key, attributes) in read_customers(customers)? {
        builder = builder.insert_attributes(key, attributes);
    }
    Ok(builder)
}

/// Build an in-memory cluster from `invoice_lines.csv` and `customers.csv`
pub fn load_cluster(
    invoice_lines: &Path,
    customers: &Path,
    layout: &ClusterLayout,
) -> StorageResult<InMemoryCluster> {
    let builder = InMemoryCluster::builder()
        .partitions(layout.partitions)
        .nodes(layout.nodes.clone());
    let lines = std::fs::File::open(invoice_lines)?;
    let people = std::fs::File::open(customers)?;
    let cluster = populate(builder, lines, people)?.build()?;

    info!(
        "Loaded {} and {} into {} partitions",
        invoice_lines.display(),
        customers.display(),
        cluster.partition_count()
    );
    Ok(cluster)
}
