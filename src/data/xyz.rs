//! Plain-text point cloud files
//!
//! One point per line, either `x y z` or `x y z nx ny nz`. Fields may be
//! separated by whitespace or commas; blank lines and `#` comments are skipped.
//! Every line of a file must carry the same layout.

use crate::core::{KernelError, PointSet, Result};
use crate::pipeline::OrientedPointCloud;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const DIM: usize = 3;

/// Points, optionally with normals, read from an xyz file
#[derive(Debug, Clone)]
pub struct XyzDataset {
    points: PointSet<f64>,
    normals: Option<PointSet<f64>>,
}

impl XyzDataset {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        let mut with_normals: Option<bool> = None;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields = Self::parse_line(line, lineno + 1)?;
            let has_normals = match fields.len() {
                DIM => false,
                n if n == 2 * DIM => true,
                n => {
                    return Err(KernelError::ParseError(format!(
                        "line {}: expected 3 or 6 fields, got {n}",
                        lineno + 1
                    )))
                }
            };
            match with_normals {
                None => with_normals = Some(has_normals),
                Some(layout) if layout != has_normals => {
                    return Err(KernelError::ParseError(format!(
                        "line {}: mixes points with and without normals",
                        lineno + 1
                    )))
                }
                Some(_) => {}
            }

            points.extend_from_slice(&fields[..DIM]);
            if has_normals {
                normals.extend_from_slice(&fields[DIM..2 * DIM]);
            }
        }

        if points.is_empty() {
            return Err(KernelError::EmptyDataset);
        }
        let normals = match with_normals {
            Some(true) => Some(PointSet::new(normals, DIM)?),
            _ => None,
        };
        Ok(Self {
            points: PointSet::new(points, DIM)?,
            normals,
        })
    }

    fn parse_line(line: &str, lineno: usize) -> Result<Vec<f64>> {
        line.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    KernelError::ParseError(format!("line {lineno}: invalid number `{field}`"))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &PointSet<f64> {
        &self.points
    }

    pub fn normals(&self) -> Option<&PointSet<f64>> {
        self.normals.as_ref()
    }

    pub fn into_points(self) -> PointSet<f64> {
        self.points
    }

    /// Pair points with their normals; fails for files without normals
    pub fn into_oriented(self) -> Result<OrientedPointCloud<f64>> {
        let normals = self.normals.ok_or_else(|| {
            KernelError::ParseError("point cloud has no normals".to_string())
        })?;
        OrientedPointCloud::new(self.points, normals)
    }
}

/// Write `x y z value` lines
pub fn write_values<W: Write>(mut writer: W, points: &PointSet<f64>, values: &[f64]) -> Result<()> {
    if points.len() != values.len() {
        return Err(KernelError::DimensionMismatch {
            expected: points.len(),
            actual: values.len(),
        });
    }
    for (row, value) in points.rows().zip(values) {
        for coord in row {
            write!(writer, "{coord} ")?;
        }
        writeln!(writer, "{value}")?;
    }
    writer.flush()?;
    Ok(())
}
