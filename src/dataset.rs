//! Block-partitioned datasets.
//!
//! A [`Dataset`] is a lazy plan: one [`ReadTask`] per block plus whatever is known
//! about the schema and row count before any data moves. Calling
//! [`materialize`](Dataset::materialize) runs every task on the dataset's [`Runner`] and
//! yields a [`MaterializedDataset`], whose blocks are held in memory in task order.
//!
//! Materialized datasets can also be built directly from documents, serde items, or a
//! numeric range, and written to a collection with
//! [`write_mongo`](MaterializedDataset::write_mongo).

use crate::block::{Block, block_to_documents, documents_to_block, schema_display};
use crate::config::DataContext;
use crate::io::mongo::{StoreConnector, WriteMongoOptions, WriteSummary, infer_schema};
use crate::runner::{Runner, Task};
use anyhow::{Result, bail, ensure};
use arrow::array::{ArrayRef, Int64Array};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bson::Document;
use std::fmt;
use std::sync::Arc;

/// Produces one block. May be called more than once.
pub type ReadFn = Arc<dyn Fn() -> Result<Block> + Send + Sync>;

/// One independently runnable block read.
#[derive(Clone)]
pub struct ReadTask {
    index: usize,
    estimated_rows: Option<u64>,
    read: ReadFn,
}

impl ReadTask {
    pub fn new(index: usize, estimated_rows: Option<u64>, read: ReadFn) -> Self {
        Self {
            index,
            estimated_rows,
            read,
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn estimated_rows(&self) -> Option<u64> {
        self.estimated_rows
    }

    /// # Errors
    /// Whatever the underlying read returns.
    pub fn run(&self) -> Result<Block> {
        (self.read)()
    }
}

impl fmt::Debug for ReadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTask")
            .field("index", &self.index)
            .field("estimated_rows", &self.estimated_rows)
            .finish_non_exhaustive()
    }
}

/// A lazily planned dataset.
#[derive(Clone, Debug)]
pub struct Dataset {
    tasks: Vec<ReadTask>,
    schema: Option<SchemaRef>,
    runner: Runner,
}

impl Dataset {
    /// `schema` is `None` when it is only known after reading.
    #[must_use]
    pub fn from_tasks(tasks: Vec<ReadTask>, schema: Option<SchemaRef>, runner: Runner) -> Self {
        Self {
            tasks,
            schema,
            runner,
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn tasks(&self) -> &[ReadTask] {
        &self.tasks
    }

    #[must_use]
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    /// Row count estimated at planning time; `None` if any task has no estimate.
    #[must_use]
    pub fn estimated_rows(&self) -> Option<u64> {
        self.tasks.iter().map(ReadTask::estimated_rows).sum()
    }

    /// Run every read task and keep the blocks in task order.
    ///
    /// # Errors
    /// Fails as a whole if any task fails; no partial dataset is returned.
    pub fn materialize(&self) -> Result<MaterializedDataset> {
        let tasks: Vec<Task<Block>> = self
            .tasks
            .iter()
            .cloned()
            .map(|t| Box::new(move || t.run()) as Task<Block>)
            .collect();
        let blocks = self.runner.run_collect(tasks)?;
        let schema = match (&self.schema, blocks.first()) {
            (Some(s), _) => Arc::clone(s),
            (None, Some(b)) => b.schema(),
            (None, None) => Arc::new(Schema::empty()),
        };
        tracing::debug!(
            blocks = blocks.len(),
            rows = blocks.iter().map(RecordBatch::num_rows).sum::<usize>(),
            "materialized dataset"
        );
        MaterializedDataset::new(schema, blocks).map(|m| m.with_runner(self.runner))
    }

    /// Exact row count. Reads the data.
    ///
    /// # Errors
    /// See [`materialize`](Self::materialize).
    pub fn count(&self) -> Result<usize> {
        Ok(self.materialize()?.num_rows())
    }

    /// Rows in each block, in block order. Reads the data.
    ///
    /// # Errors
    /// See [`materialize`](Self::materialize).
    pub fn block_num_rows(&self) -> Result<Vec<usize>> {
        Ok(self.materialize()?.block_num_rows())
    }

    /// # Errors
    /// Read errors, then the errors of [`MaterializedDataset::write_mongo`].
    pub fn write_mongo(
        &self,
        connector: Arc<dyn StoreConnector>,
        ctx: &DataContext,
        options: WriteMongoOptions,
    ) -> Result<WriteSummary> {
        self.materialize()?.write_mongo(connector, ctx, options)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.estimated_rows() {
            Some(n) => write!(f, "Dataset(num_rows={n}, ")?,
            None => f.write_str("Dataset(num_rows=?, ")?,
        }
        match &self.schema {
            Some(s) => write!(f, "schema={})", schema_display(s)),
            None => f.write_str("schema=Unknown schema)"),
        }
    }
}

/// A dataset whose blocks are in memory.
#[derive(Clone, Debug)]
pub struct MaterializedDataset {
    blocks: Vec<Block>,
    schema: SchemaRef,
    runner: Runner,
}

impl MaterializedDataset {
    /// # Errors
    /// Fails if any block's columns differ from `schema` in name, order, or type.
    pub fn new(schema: SchemaRef, blocks: Vec<Block>) -> Result<Self> {
        for (i, block) in blocks.iter().enumerate() {
            ensure!(
                same_columns(&schema, &block.schema()),
                "block {i} has schema {} but the dataset has {}",
                schema_display(&block.schema()),
                schema_display(&schema)
            );
        }
        Ok(Self {
            blocks,
            schema,
            runner: Runner::default(),
        })
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = runner;
        self
    }

    /// Infer a schema from `docs` and split them into about `num_blocks` blocks.
    ///
    /// # Errors
    /// Returns conversion errors from building the block.
    pub fn from_documents(docs: &[Document], num_blocks: usize) -> Result<Self> {
        let schema = Arc::clone(infer_schema(docs).arrow());
        let block = documents_to_block(docs, &schema)?;
        Self::new(schema, split_block(&block, num_blocks))
    }

    /// Build a dataset from serde-serializable items, one column per struct field.
    ///
    /// ```
    /// use ironbeam_mongo::MaterializedDataset;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Serialize, Deserialize)]
    /// struct Row {
    ///     float_field: f64,
    ///     int_field: i32,
    /// }
    ///
    /// let ds = MaterializedDataset::from_items(
    ///     &[Row { float_field: 2.0, int_field: 1 }, Row { float_field: 4.0, int_field: 2 }],
    ///     1,
    /// )
    /// .unwrap();
    /// assert_eq!(ds.num_rows(), 2);
    /// ```
    ///
    /// # Errors
    /// Returns an error if the item type cannot be traced to an Arrow schema.
    #[cfg(feature = "typed-items")]
    pub fn from_items<T>(items: &[T], num_blocks: usize) -> Result<Self>
    where
        T: serde::Serialize + serde::Deserialize<'static>,
    {
        use anyhow::Context;
        use arrow::datatypes::FieldRef;
        use serde_arrow::schema::{SchemaLike, TracingOptions};

        let fields = Vec::<FieldRef>::from_type::<T>(
            TracingOptions::default().strings_as_large_utf8(false),
        )
        .context("infer Arrow schema from type T")?;
        let block = serde_arrow::to_record_batch(&fields, &items)
            .context("convert items to a block")?;
        Self::new(block.schema(), split_block(&block, num_blocks))
    }

    /// A single `id: int64` column holding `0..n`.
    ///
    /// # Errors
    /// Fails only if `n` does not fit in an `i64`.
    pub fn range(n: usize, num_blocks: usize) -> Result<Self> {
        let end = i64::try_from(n)?;
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let column: ArrayRef = Arc::new(Int64Array::from_iter_values(0..end));
        let block = RecordBatch::try_new(Arc::clone(&schema), vec![column])?;
        Self::new(schema, split_block(&block, num_blocks))
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.blocks.iter().map(RecordBatch::num_rows).sum()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.num_rows()
    }

    #[must_use]
    pub fn block_num_rows(&self) -> Vec<usize> {
        self.blocks.iter().map(RecordBatch::num_rows).collect()
    }

    /// Remove the named columns from every block.
    ///
    /// # Errors
    /// Fails if a name is not a column of the dataset.
    pub fn drop_columns(&self, names: &[&str]) -> Result<Self> {
        for name in names {
            if self.schema.index_of(name).is_err() {
                bail!("cannot drop column `{name}`: not in {}", schema_display(&self.schema));
            }
        }
        let keep: Vec<usize> = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !names.contains(&f.name().as_str()))
            .map(|(i, _)| i)
            .collect();
        let schema = Arc::new(self.schema.project(&keep)?);
        let blocks = self
            .blocks
            .iter()
            .map(|b| b.project(&keep))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(schema, blocks)?.with_runner(self.runner))
    }

    /// Concatenate the blocks of two datasets with the same columns.
    ///
    /// A column is nullable in the result if it is nullable in either input.
    ///
    /// # Errors
    /// Fails if the column names, order, or types differ.
    pub fn union(&self, other: &Self) -> Result<Self> {
        ensure!(
            same_columns(&self.schema, &other.schema),
            "cannot union {} with {}",
            schema_display(&self.schema),
            schema_display(&other.schema)
        );
        let fields: Vec<Field> = self
            .schema
            .fields()
            .iter()
            .zip(other.schema.fields())
            .map(|(a, b)| a.as_ref().clone().with_nullable(a.is_nullable() || b.is_nullable()))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let blocks = self
            .blocks
            .iter()
            .chain(&other.blocks)
            .map(|b| RecordBatch::try_new(Arc::clone(&schema), b.columns().to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(schema, blocks)?.with_runner(self.runner))
    }

    /// Merge all blocks and split again into about `num_blocks` blocks.
    ///
    /// # Errors
    /// Returns Arrow errors from concatenation.
    pub fn repartition(&self, num_blocks: usize) -> Result<Self> {
        let merged = self.concat()?;
        Ok(Self::new(self.schema(), split_block(&merged, num_blocks))?.with_runner(self.runner))
    }

    /// All rows as a single block.
    ///
    /// # Errors
    /// Returns Arrow errors from concatenation.
    pub fn concat(&self) -> Result<Block> {
        Ok(concat_batches(&self.schema, &self.blocks)?)
    }

    /// All rows as documents, in block order. Null cells are omitted.
    ///
    /// # Errors
    /// Returns conversion errors for columns with no document representation.
    pub fn to_documents(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::with_capacity(self.num_rows());
        for block in &self.blocks {
            docs.extend(block_to_documents(block)?);
        }
        Ok(docs)
    }

    /// A lazy view whose tasks hand back the in-memory blocks.
    #[must_use]
    pub fn to_dataset(&self) -> Dataset {
        let tasks = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let block = block.clone();
                let rows = block.num_rows() as u64;
                ReadTask::new(
                    i,
                    Some(rows),
                    Arc::new(move || -> Result<Block> { Ok(block.clone()) }),
                )
            })
            .collect();
        Dataset::from_tasks(tasks, Some(self.schema()), self.runner)
    }

    /// Insert every block into a collection, one task per block.
    ///
    /// # Errors
    /// See [`write_mongo`](crate::io::mongo::write_mongo).
    pub fn write_mongo(
        &self,
        connector: Arc<dyn StoreConnector>,
        ctx: &DataContext,
        options: WriteMongoOptions,
    ) -> Result<WriteSummary> {
        crate::io::mongo::write_mongo(self, connector, ctx, options)
    }
}

impl fmt::Display for MaterializedDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MaterializedDataset(\n   num_blocks={},\n   num_rows={},\n   schema={}\n)",
            self.num_blocks(),
            self.num_rows(),
            schema_display(&self.schema)
        )
    }
}

fn same_columns(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a.fields()
            .iter()
            .zip(b.fields())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

/// Cut a block into `ceil(rows / num_blocks)`-row slices. Never more slices than rows,
/// and always at least one.
fn split_block(block: &Block, num_blocks: usize) -> Vec<Block> {
    let n = block.num_rows();
    let parts = num_blocks.clamp(1, n.max(1));
    let chunk = n.div_ceil(parts).max(1);
    (0..parts)
        .map(|i| {
            let start = (i * chunk).min(n);
            let end = ((i + 1) * chunk).min(n);
            block.slice(start, end - start)
        })
        .collect()
}
