use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::Dataset;
use flate2::read::GzDecoder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;

const CIFAR_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const ARCHIVE_DIR: &str = "cifar-10-batches-bin";
const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const PIXELS_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS_PER_IMAGE;

pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CifarSplit {
    Train,
    Val,
    Test,
}

/// A single image in channel-major `(3, 32, 32)` layout.
#[derive(Clone, Debug, PartialEq)]
pub struct CifarItem {
    pub pixels: Vec<u8>,
    pub label: usize,
}

#[derive(Debug, Default)]
struct CifarRecords {
    labels: Vec<u8>,
    pixels: Vec<u8>,
}

impl CifarRecords {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn extend_from_bytes(&mut self, bytes: &[u8], source: &Path) -> io::Result<()> {
        if bytes.len() % RECORD_LEN != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} holds {} bytes, not a multiple of the {RECORD_LEN}-byte record",
                    source.display(),
                    bytes.len()
                ),
            ));
        }

        for record in bytes.chunks_exact(RECORD_LEN) {
            let label = record[0];
            if label as usize >= CLASS_NAMES.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} contains invalid label {label}", source.display()),
                ));
            }
            self.labels.push(label);
            self.pixels.extend_from_slice(&record[1..]);
        }
        Ok(())
    }
}

/// One split of CIFAR-10, sharing the decoded records with sibling splits.
#[derive(Clone, Debug)]
pub struct CifarDataset {
    records: Arc<CifarRecords>,
    indices: Vec<usize>,
}

impl CifarDataset {
    /// Opens `split`, downloading and unpacking the archive into `cache_dir` when missing.
    ///
    /// `Train` and `Val` partition the 50 000 training images with a permutation
    /// seeded by `seed`; the last `validation_size` indices form `Val`.
    pub fn new(
        cache_dir: impl AsRef<Path>,
        split: CifarSplit,
        validation_size: usize,
        seed: u64,
    ) -> io::Result<Self> {
        let batches_dir = ensure_downloaded(cache_dir.as_ref())?;
        let files: Vec<PathBuf> = match split {
            CifarSplit::Train | CifarSplit::Val => {
                TRAIN_FILES.iter().map(|name| batches_dir.join(name)).collect()
            }
            CifarSplit::Test => vec![batches_dir.join(TEST_FILE)],
        };

        let records = Arc::new(read_batch_files(&files)?);
        let dataset = Self::from_shared(records, split, validation_size, seed)?;
        info!(
            "loaded CIFAR-10 {split:?} split with {} images",
            dataset.len()
        );
        Ok(dataset)
    }

    /// Opens the 10 000-image test split, downloading the archive when missing.
    pub fn test(cache_dir: impl AsRef<Path>) -> io::Result<Self> {
        let batches_dir = ensure_downloaded(cache_dir.as_ref())?;
        let records = Arc::new(read_batch_files(&[batches_dir.join(TEST_FILE)])?);
        let dataset = Self::from_shared(records, CifarSplit::Test, 0, 0)?;
        info!("loaded CIFAR-10 test split with {} images", dataset.len());
        Ok(dataset)
    }

    /// Builds the train and validation splits from one read of the training files.
    pub fn train_val(
        cache_dir: impl AsRef<Path>,
        validation_size: usize,
        seed: u64,
    ) -> io::Result<(Self, Self)> {
        let batches_dir = ensure_downloaded(cache_dir.as_ref())?;
        let files: Vec<PathBuf> = TRAIN_FILES
            .iter()
            .map(|name| batches_dir.join(name))
            .collect();
        let records = Arc::new(read_batch_files(&files)?);

        let train = Self::from_shared(Arc::clone(&records), CifarSplit::Train, validation_size, seed)?;
        let val = Self::from_shared(records, CifarSplit::Val, validation_size, seed)?;
        info!(
            "loaded CIFAR-10 train/val splits with {} / {} images",
            train.len(),
            val.len()
        );
        Ok((train, val))
    }

    /// Reads raw batch files without touching the network.
    pub fn from_batch_files(
        files: &[PathBuf],
        split: CifarSplit,
        validation_size: usize,
        seed: u64,
    ) -> io::Result<Self> {
        let records = Arc::new(read_batch_files(files)?);
        Self::from_shared(records, split, validation_size, seed)
    }

    fn from_shared(
        records: Arc<CifarRecords>,
        split: CifarSplit,
        validation_size: usize,
        seed: u64,
    ) -> io::Result<Self> {
        let total = records.len();
        let indices = match split {
            CifarSplit::Test => (0..total).collect(),
            CifarSplit::Train | CifarSplit::Val => {
                if validation_size >= total {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("validation size {validation_size} leaves no training images out of {total}"),
                    ));
                }
                let mut permutation: Vec<usize> = (0..total).collect();
                permutation.shuffle(&mut StdRng::seed_from_u64(seed));
                let train_len = total - validation_size;
                if split == CifarSplit::Train {
                    permutation.truncate(train_len);
                    permutation
                } else {
                    permutation.split_off(train_len)
                }
            }
        };

        Ok(Self { records, indices })
    }
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let record = *self.indices.get(index)?;
        let start = record * PIXELS_PER_IMAGE;
        Some(CifarItem {
            pixels: self.records.pixels[start..start + PIXELS_PER_IMAGE].to_vec(),
            label: self.records.labels[record] as usize,
        })
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

fn read_batch_files(files: &[PathBuf]) -> io::Result<CifarRecords> {
    let mut records = CifarRecords::default();
    for path in files {
        let bytes = fs::read(path)?;
        records.extend_from_bytes(&bytes, path)?;
    }
    Ok(records)
}

fn ensure_downloaded(cache_dir: &Path) -> io::Result<PathBuf> {
    let batches_dir = cache_dir.join(ARCHIVE_DIR);
    let complete = TRAIN_FILES
        .iter()
        .chain(std::iter::once(&TEST_FILE))
        .all(|name| batches_dir.join(name).is_file());
    if !complete {
        fs::create_dir_all(cache_dir)?;
        download_cifar(cache_dir)?;
    }
    Ok(batches_dir)
}

fn download_cifar(cache_dir: &Path) -> io::Result<()> {
    info!("downloading CIFAR-10 from {CIFAR_URL}");
    let response = ureq::get(CIFAR_URL)
        .call()
        .map_err(|err| io::Error::other(err.to_string()))?;

    let decoder = GzDecoder::new(response.into_reader());
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(cache_dir)
}
