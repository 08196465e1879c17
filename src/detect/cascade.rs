//! PICO cascade classifier
//!
//! A cascade is a sequence of binary decision trees. Every internal node
//! compares the intensity of two pixels picked relative to the window centre;
//! the reached leaf adds its prediction to a running score and a window is
//! rejected as soon as the score drops to the tree's threshold.
//!
//! Binary layout (little endian):
//!
//! | bytes | content |
//! |-------|---------|
//! | 8 | header, ignored |
//! | 4 | tree depth `d` (u32) |
//! | 4 | tree count (u32) |
//! | per tree: `4·(2^d − 1)` | node codes `[r1, c1, r2, c2]` as i8 |
//! | per tree: `4·2^d` | leaf predictions (f32) |
//! | per tree: 4 | rejection threshold (f32) |

use crate::config::CascadeParams;
use crate::detect::Detection;
use crate::error::{CoverCropError, Result};
use image::GrayImage;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const HEADER_LEN: usize = 8;
const MAX_DEPTH: u32 = 16;

/// One decision tree of a cascade
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeTree {
    /// Internal nodes in breadth-first order; offsets are in 1/256 of the window size
    pub codes: Vec<[i8; 4]>,
    /// Leaf predictions, left to right
    pub predictions: Vec<f32>,
    /// Windows whose running score is at or below this value are rejected
    pub threshold: f32,
}

impl CascadeTree {
    #[must_use]
    pub fn new(codes: Vec<[i8; 4]>, predictions: Vec<f32>, threshold: f32) -> Self {
        Self {
            codes,
            predictions,
            threshold,
        }
    }
}

/// Unpacked cascade, flattened for scanning
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
    depth: u32,
    tree_count: usize,
    /// Per tree `4·2^d` codes; the first four of each tree are padding so that
    /// node `idx` lives at `4·idx`.
    codes: Vec<i8>,
    predictions: Vec<f32>,
    thresholds: Vec<f32>,
}

impl Cascade {
    /// Assemble a cascade from its trees
    ///
    /// # Errors
    /// - Depth is zero or above 16
    /// - A tree has the wrong number of nodes or leaves for the depth
    /// - A prediction or threshold is not finite
    pub fn new(depth: u32, trees: Vec<CascadeTree>) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(CoverCropError::classifier(format!(
                "Unsupported tree depth {} (expected 1-{})",
                depth, MAX_DEPTH
            )));
        }

        let leaves = 1usize << depth;
        let mut codes = Vec::with_capacity(trees.len() * 4 * leaves);
        let mut predictions = Vec::with_capacity(trees.len() * leaves);
        let mut thresholds = Vec::with_capacity(trees.len());

        for (i, tree) in trees.iter().enumerate() {
            if tree.codes.len() != leaves - 1 || tree.predictions.len() != leaves {
                return Err(CoverCropError::classifier(format!(
                    "Tree {} has {} nodes and {} leaves, depth {} needs {} and {}",
                    i,
                    tree.codes.len(),
                    tree.predictions.len(),
                    depth,
                    leaves - 1,
                    leaves
                )));
            }
            if !tree.threshold.is_finite() || tree.predictions.iter().any(|p| !p.is_finite()) {
                return Err(CoverCropError::classifier(format!(
                    "Tree {} contains non-finite values",
                    i
                )));
            }

            codes.extend_from_slice(&[0; 4]);
            codes.extend(tree.codes.iter().flatten());
            predictions.extend_from_slice(&tree.predictions);
            thresholds.push(tree.threshold);
        }

        Ok(Self {
            depth,
            tree_count: trees.len(),
            codes,
            predictions,
            thresholds,
        })
    }

    /// Unpack a cascade from its binary form
    ///
    /// # Errors
    /// Returns [`CoverCropError::ClassifierUnavailable`] when the packet is
    /// truncated, has trailing bytes or describes an invalid tree shape.
    pub fn from_bytes(packet: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(packet);
        reader.take(HEADER_LEN)?;

        let depth = reader.read_u32()?;
        if depth == 0 || depth > MAX_DEPTH {
            return Err(CoverCropError::classifier(format!(
                "Unsupported tree depth {} (expected 1-{})",
                depth, MAX_DEPTH
            )));
        }
        let tree_count = reader.read_u32()? as usize;
        let leaves = 1usize << depth;

        // Each tree needs at least this many bytes; reject absurd counts early
        let tree_bytes = 4 * (leaves - 1) + 4 * leaves + 4;
        if tree_count.saturating_mul(tree_bytes) > reader.remaining() {
            return Err(CoverCropError::classifier(format!(
                "Cascade declares {} trees but only {} bytes remain",
                tree_count,
                reader.remaining()
            )));
        }

        let mut trees = Vec::with_capacity(tree_count);
        for _ in 0..tree_count {
            let codes = reader
                .take(4 * (leaves - 1))?
                .chunks_exact(4)
                .map(|c| [c[0] as i8, c[1] as i8, c[2] as i8, c[3] as i8])
                .collect();
            let predictions = (0..leaves)
                .map(|_| reader.read_f32())
                .collect::<Result<Vec<_>>>()?;
            let threshold = reader.read_f32()?;
            trees.push(CascadeTree::new(codes, predictions, threshold));
        }

        if reader.remaining() != 0 {
            return Err(CoverCropError::classifier(format!(
                "{} trailing bytes after cascade data",
                reader.remaining()
            )));
        }

        Self::new(depth, trees)
    }

    /// Load and unpack a cascade file
    ///
    /// # Errors
    /// [`CoverCropError::ClassifierUnavailable`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let packet = std::fs::read(path).map_err(|e| {
            CoverCropError::classifier(format!(
                "Failed to read cascade model '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_bytes(&packet)
    }

    /// Pack the cascade into its binary form
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let leaves = 1usize << self.depth;
        let mut packet = vec![0u8; HEADER_LEN];
        packet.extend_from_slice(&self.depth.to_le_bytes());
        packet.extend_from_slice(&(self.tree_count as u32).to_le_bytes());

        for t in 0..self.tree_count {
            let codes = self
                .codes
                .get(t * 4 * leaves + 4..(t + 1) * 4 * leaves)
                .unwrap_or(&[]);
            packet.extend(codes.iter().map(|&c| c as u8));
            for p in self.predictions.get(t * leaves..(t + 1) * leaves).unwrap_or(&[]) {
                packet.extend_from_slice(&p.to_le_bytes());
            }
            let threshold = self.thresholds.get(t).copied().unwrap_or_default();
            packet.extend_from_slice(&threshold.to_le_bytes());
        }
        packet
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.tree_count
    }

    /// Score the window centred at (`row`, `col`) with side `scale`
    ///
    /// Returns a negative value when any tree rejects the window.
    fn classify_region(&self, row: i32, col: i32, scale: i32, image: &GrayImage) -> f32 {
        if self.tree_count == 0 {
            return 0.0;
        }

        let pixels = image.as_raw();
        let dim = i64::from(image.width());
        let leaves = 1usize << self.depth;
        let r = i64::from(row) * 256;
        let c = i64::from(col) * 256;
        let s = i64::from(scale);

        let pixel_at = |code_r: i8, code_c: i8| -> u8 {
            let y = (r + i64::from(code_r) * s) >> 8;
            let x = (c + i64::from(code_c) * s) >> 8;
            usize::try_from(y * dim + x)
                .ok()
                .and_then(|i| pixels.get(i).copied())
                .unwrap_or(0)
        };

        let mut root = 0usize;
        let mut out = 0.0f32;
        for (i, threshold) in self.thresholds.iter().enumerate() {
            let mut idx = 1usize;
            for _ in 0..self.depth {
                let node = self.codes.get(root + 4 * idx..root + 4 * idx + 4).unwrap_or(&[0; 4]);
                let p1 = pixel_at(node[0], node[1]);
                let p2 = pixel_at(node[2], node[3]);
                idx = 2 * idx + usize::from(p1 <= p2);
            }

            out += self
                .predictions
                .get(leaves * i + idx - leaves)
                .copied()
                .unwrap_or_default();
            if out <= *threshold {
                return -1.0;
            }
            root += 4 * leaves;
        }

        out - self.thresholds.last().copied().unwrap_or_default()
    }

    /// Scan the image at every window size between the configured bounds
    ///
    /// Detections come out in scan order: window size, then row, then column.
    ///
    /// # Errors
    /// [`CoverCropError::Cancelled`] if `cancel` fires during the scan.
    pub fn run(
        &self,
        image: &GrayImage,
        params: &CascadeParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<Detection>> {
        let rows = i32::try_from(image.height()).unwrap_or(i32::MAX);
        let cols = i32::try_from(image.width()).unwrap_or(i32::MAX);
        let max_size = i32::try_from(params.max_size).unwrap_or(i32::MAX);
        let mut detections = Vec::new();

        let mut scale = i32::try_from(params.min_size).unwrap_or(i32::MAX);
        while scale <= max_size {
            let step = ((params.shift_factor * f64::from(scale)) as usize).max(1);
            let offset = scale / 2 + 1;

            for row in (offset..=rows - offset).step_by(step) {
                if cancel.is_cancelled() {
                    return Err(CoverCropError::cancelled("cascade scan"));
                }
                for col in (offset..=cols - offset).step_by(step) {
                    let score = self.classify_region(row, col, scale, image);
                    if score > params.score_threshold {
                        detections.push(Detection {
                            row,
                            col,
                            scale,
                            score,
                        });
                    }
                }
            }

            let next = (f64::from(scale) * params.scale_factor) as i32;
            scale = if next > scale { next } else { scale + 1 };
        }

        Ok(detections)
    }
}

/// Bounds-checked little-endian reader over a cascade packet
struct PacketReader<'a> {
    packet: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn new(packet: &'a [u8]) -> Self {
        Self { packet, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.packet.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self
            .packet
            .get(self.pos..self.pos + len)
            .ok_or_else(|| {
                CoverCropError::classifier(format!(
                    "Cascade data truncated at byte {} (needed {} more)",
                    self.pos, len
                ))
            })?;
        self.pos += len;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
