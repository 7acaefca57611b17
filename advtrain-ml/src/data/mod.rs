//! Labelled sample matrices, batching, and input transforms.

pub mod synthetic;
pub mod transform;

pub use transform::{Transform, build_transforms};

use crate::error::{BatchError, MlError, Result};
use advtrain_core::ExperimentConfig;
use advtrain_core::config::DataSourceKind;
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One slice of training data.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array1<f32>,
}

impl Batch {
    /// Reject batches the loop cannot train on.
    pub fn validate(&self, n_features: usize) -> std::result::Result<(), BatchError> {
        if self.x.nrows() == 0 || self.y.is_empty() {
            return Err(BatchError::Empty);
        }
        if self.x.nrows() != self.y.len() || self.x.ncols() != n_features {
            return Err(BatchError::Malformed {
                rows: self.x.nrows(),
                labels: self.y.len(),
                features: self.x.ncols(),
                expected: n_features,
            });
        }
        if !self.x.iter().chain(self.y.iter()).all(|v| v.is_finite()) {
            return Err(BatchError::NonFinite);
        }
        Ok(())
    }
}

/// Anything that can hand the training loop one epoch of batches.
pub trait BatchSource {
    fn n_features(&self) -> usize;

    fn epoch_batches(&self, batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<Batch>;
}

/// A labelled design matrix: one row per series, labels are class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array1<f32>,
    n_classes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDataset {
    x: Vec<Vec<f32>>,
    y: Vec<f32>,
}

impl Dataset {
    pub fn new(x: Array2<f32>, y: Array1<f32>, n_classes: usize) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlError::ShapeMismatch {
                what: "labels",
                got: y.len(),
                expected: x.nrows(),
            });
        }
        if let Some(bad) = y
            .iter()
            .find(|&&v| v.fract() != 0.0 || v < 0.0 || v as usize >= n_classes)
        {
            return Err(MlError::dataset(format!(
                "label {bad} is not a class index below {n_classes}"
            )));
        }
        Ok(Self { x, y, n_classes })
    }

    /// Clean rows labelled 0 stacked over adversarial rows labelled 1.
    pub fn detection(clean: ArrayView2<f32>, adversarial: ArrayView2<f32>) -> Result<Self> {
        let x = concatenate(Axis(0), &[clean.view(), adversarial.view()])?;
        let mut y = Array1::zeros(x.nrows());
        y.slice_mut(s![clean.nrows()..]).fill(1.0);
        Self::new(x, y, 2)
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn x(&self) -> &Array2<f32> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f32> {
        &self.y
    }

    /// Keep the leading `len` steps of every series.
    pub fn truncate_steps(&self, len: usize) -> Self {
        let len = len.min(self.x.ncols());
        Self {
            x: self.x.slice(s![.., ..len]).to_owned(),
            y: self.y.clone(),
            n_classes: self.n_classes,
        }
    }

    fn batches_in_order(&self, order: &[usize], batch_size: usize) -> Vec<Batch> {
        order
            .chunks(batch_size.max(1))
            .map(|idx| Batch {
                x: self.x.select(Axis(0), idx),
                y: self.y.select(Axis(0), idx),
            })
            .collect()
    }
}

impl BatchSource for Dataset {
    fn n_features(&self) -> usize {
        self.x.ncols()
    }

    fn epoch_batches(&self, batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = shuffle {
            order.shuffle(rng);
        }
        self.batches_in_order(&order, batch_size)
    }
}

fn read_raw(path: &Path) -> Result<RawDataset> {
    if !path.exists() {
        return Err(advtrain_core::ArtifactError::NotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn to_matrix(rows: Vec<Vec<f32>>, path: &Path) -> Result<Array2<f32>> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(MlError::dataset(format!(
            "{}: series have different lengths",
            path.display()
        )));
    }
    let n = rows.len();
    Ok(Array2::from_shape_vec((n, width), rows.into_iter().flatten().collect())?)
}

/// Map raw label values onto `0..k`, in sorted order, across both splits.
fn encode_labels(train: &[f32], test: &[f32]) -> Result<(Vec<f32>, Vec<f32>, usize)> {
    let mut codes: BTreeMap<i64, f32> = BTreeMap::new();
    for &v in train.iter().chain(test) {
        if v.fract() != 0.0 || !v.is_finite() {
            return Err(MlError::dataset(format!("non-integral label {v}")));
        }
        codes.insert(v as i64, 0.0);
    }
    for (i, code) in codes.values_mut().enumerate() {
        *code = i as f32;
    }
    let map = |ys: &[f32]| ys.iter().map(|v| codes[&(*v as i64)]).collect::<Vec<_>>();
    Ok((map(train), map(test), codes.len()))
}

/// Load `{"x": [[...]], "y": [...]}` train and test files.
pub fn load_json_splits(train_path: &Path, test_path: &Path, n_classes: usize) -> Result<(Dataset, Dataset)> {
    let train = read_raw(train_path)?;
    let test = read_raw(test_path)?;
    let (y_train, y_test, found) = encode_labels(&train.y, &test.y)?;
    if found > n_classes {
        return Err(MlError::dataset(format!(
            "found {found} distinct labels, configured for {n_classes}"
        )));
    }
    let x_train = to_matrix(train.x, train_path)?;
    let x_test = to_matrix(test.x, test_path)?;
    if x_train.ncols() != x_test.ncols() {
        return Err(MlError::ShapeMismatch {
            what: "test series length",
            got: x_test.ncols(),
            expected: x_train.ncols(),
        });
    }
    Ok((
        Dataset::new(x_train, Array1::from(y_train), n_classes)?,
        Dataset::new(x_test, Array1::from(y_test), n_classes)?,
    ))
}

/// Write a dataset in the JSON layout [`load_json_splits`] reads.
pub fn save_json(path: &Path, data: &Dataset) -> Result<()> {
    let raw = RawDataset {
        x: data.x.rows().into_iter().map(|r| r.to_vec()).collect(),
        y: data.y.to_vec(),
    };
    advtrain_core::artifacts::atomic_write_json(path, &raw)?;
    Ok(())
}

/// Load the configured train and test splits, sliced if requested.
pub fn load_splits(config: &ExperimentConfig, seed: u64) -> Result<(Dataset, Dataset)> {
    let ds = &config.dataset;
    let (train, test) = match ds.source {
        DataSourceKind::Synthetic => synthetic::generate(ds, seed)?,
        DataSourceKind::Json => {
            let (Some(train), Some(test)) = (&ds.train_path, &ds.test_path) else {
                return Err(advtrain_core::ConfigError::MissingField {
                    field: "dataset.train_path".into(),
                }
                .into());
            };
            load_json_splits(train, test, ds.n_classes)?
        }
    };
    if train.is_empty() || test.is_empty() {
        return Err(MlError::dataset(format!("{}: empty split", ds.name)));
    }
    let len = config.effective_len(train.n_features());
    tracing::info!(
        dataset = %ds.name,
        n_train = train.len(),
        n_test = test.len(),
        seq_len = len,
        "Loaded dataset"
    );
    if len < train.n_features() {
        Ok((train.truncate_steps(len), test.truncate_steps(len)))
    } else {
        Ok((train, test))
    }
}
