//! # Weights
//!
//! $$
//! \tilde w_i = \operatorname{round}_n\big(w_i \cdot \mathbf{1}_{|w_i| \ge c}\big)
//! $$
//!
//! Ticker keyed weight vectors, cleaning and persistence.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::ops::Index;
use std::path::Path;

use serde::ser::SerializeMap;
use serde::Serialize;
use serde::Serializer;

use crate::error::FrontierError;
use crate::error::Result;

/// Asset to weight mapping preserving the universe order.
#[derive(Clone, Debug, PartialEq)]
pub struct Weights {
  tickers: Vec<String>,
  values: Vec<f64>,
}

impl Weights {
  pub(crate) fn from_parts(tickers: Vec<String>, values: Vec<f64>) -> Self {
    debug_assert_eq!(tickers.len(), values.len());
    Self { tickers, values }
  }

  pub fn get(&self, ticker: &str) -> Option<f64> {
    self
      .tickers
      .iter()
      .position(|t| t == ticker)
      .map(|i| self.values[i])
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn sum(&self) -> f64 {
    self.values.iter().sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .tickers
      .iter()
      .map(String::as_str)
      .zip(self.values.iter().copied())
  }

  pub fn to_map(&self) -> BTreeMap<String, f64> {
    self.iter().map(|(t, w)| (t.to_string(), w)).collect()
  }

  /// Zero out weights below `cutoff` in magnitude, then round to `rounding` decimals.
  pub fn clean(&self, cutoff: f64, rounding: Option<u32>) -> Result<Weights> {
    if rounding == Some(0) {
      return Err(FrontierError::config("rounding", "must be a positive integer"));
    }
    if !(cutoff >= 0.0) {
      return Err(FrontierError::config("cutoff", "must be non-negative"));
    }

    let values = self
      .values
      .iter()
      .map(|&w| {
        let w = if w.abs() < cutoff { 0.0 } else { w };
        match rounding {
          Some(n) => {
            let scale = 10f64.powi(n as i32);
            let r = (w * scale).round() / scale;
            // avoid printing -0.0
            if r == 0.0 {
              0.0
            } else {
              r
            }
          }
          None => w,
        }
      })
      .collect();

    Ok(Self::from_parts(self.tickers.clone(), values))
  }
}

impl Index<&str> for Weights {
  type Output = f64;

  fn index(&self, ticker: &str) -> &f64 {
    let i = self
      .tickers
      .iter()
      .position(|t| t == ticker)
      .unwrap_or_else(|| panic!("unknown ticker {ticker}"));
    &self.values[i]
  }
}

impl Serialize for Weights {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.len()))?;
    for (ticker, w) in self.iter() {
      map.serialize_entry(ticker, &w)?;
    }
    map.end()
  }
}

/// Converts between raw solver vectors and ticker keyed [`Weights`].
#[derive(Clone, Debug)]
pub struct WeightMapper {
  tickers: Vec<String>,
}

impl WeightMapper {
  pub fn new(tickers: Vec<String>) -> Self {
    Self { tickers }
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  pub fn to_weights(&self, values: &[f64]) -> Weights {
    Weights::from_parts(self.tickers.clone(), values.to_vec())
  }

  /// Reorder a mapping into universe order; every ticker must be present exactly once.
  pub fn from_map(&self, map: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
    if map.len() != self.tickers.len() {
      return Err(FrontierError::config(
        "weights",
        format!("{} weights for {} assets", map.len(), self.tickers.len()),
      ));
    }
    self
      .tickers
      .iter()
      .map(|t| {
        map
          .get(t)
          .copied()
          .ok_or_else(|| FrontierError::config("weights", format!("missing weight for {t}")))
      })
      .collect()
  }
}

/// Output format chosen from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightFormat {
  Csv,
  Json,
  Txt,
}

impl WeightFormat {
  pub fn from_path(path: &Path) -> Result<Self> {
    let ext = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
      Some("csv") => Ok(WeightFormat::Csv),
      Some("json") => Ok(WeightFormat::Json),
      Some("txt") => Ok(WeightFormat::Txt),
      _ => Err(FrontierError::config(
        "filename",
        format!("unsupported extension for {}", path.display()),
      )),
    }
  }
}

/// Write weights as `ticker,weight` rows, a JSON object, or `ticker: weight` lines.
pub fn save_weights(weights: &Weights, path: impl AsRef<Path>) -> Result<()> {
  let path = path.as_ref();
  match WeightFormat::from_path(path)? {
    WeightFormat::Csv => {
      let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
      for (ticker, w) in weights.iter() {
        wtr.write_record([ticker, w.to_string().as_str()])?;
      }
      wtr.flush()?;
    }
    WeightFormat::Json => {
      let file = File::create(path)?;
      serde_json::to_writer_pretty(file, weights)?;
    }
    WeightFormat::Txt => {
      let mut file = File::create(path)?;
      for (ticker, w) in weights.iter() {
        writeln!(file, "{ticker}: {w}")?;
      }
    }
  }
  tracing::debug!(path = %path.display(), n = weights.len(), "saved weights");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Weights {
    WeightMapper::new(vec!["AAA".into(), "BBB".into(), "CCC".into()])
      .to_weights(&[0.123456789, 0.00004, 0.876503211])
  }

  #[test]
  fn clean_drops_tiny_weights_and_rounds() {
    let cleaned = sample().clean(1e-4, Some(5)).unwrap();
    assert_eq!(cleaned["AAA"], 0.12346);
    assert_eq!(cleaned["BBB"], 0.0);
    assert_eq!(cleaned["CCC"], 0.8765);
  }

  #[test]
  fn clean_without_rounding_keeps_precision() {
    let cleaned = sample().clean(1e-4, None).unwrap();
    assert_eq!(cleaned.get("AAA"), Some(0.123456789));
    assert_eq!(cleaned.get("BBB"), Some(0.0));
  }

  #[test]
  fn clean_rejects_zero_rounding() {
    assert!(sample().clean(1e-4, Some(0)).is_err());
  }

  #[test]
  fn mapper_reorders_maps() {
    let mapper = WeightMapper::new(vec!["B".into(), "A".into()]);
    let map = BTreeMap::from([("A".to_string(), 0.3), ("B".to_string(), 0.7)]);
    assert_eq!(mapper.from_map(&map).unwrap(), vec![0.7, 0.3]);

    let partial = BTreeMap::from([("A".to_string(), 1.0), ("C".to_string(), 0.0)]);
    assert!(mapper.from_map(&partial).is_err());
  }

  #[test]
  fn json_preserves_universe_order() {
    let json = serde_json::to_string(&sample()).unwrap();
    let a = json.find("AAA").unwrap();
    let c = json.find("CCC").unwrap();
    assert!(a < c);
  }

  #[test]
  fn saves_all_formats() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let weights = sample().clean(1e-4, Some(5))?;

    let csv_path = dir.path().join("w.csv");
    save_weights(&weights, &csv_path)?;
    let text = std::fs::read_to_string(&csv_path)?;
    assert!(text.starts_with("AAA,0.12346"));
    assert_eq!(text.lines().count(), 3);

    let json_path = dir.path().join("w.json");
    save_weights(&weights, &json_path)?;
    let parsed: BTreeMap<String, f64> =
      serde_json::from_str(&std::fs::read_to_string(&json_path)?)?;
    assert_eq!(parsed["CCC"], 0.8765);

    let txt_path = dir.path().join("w.txt");
    save_weights(&weights, &txt_path)?;
    assert!(std::fs::read_to_string(&txt_path)?.contains("BBB: 0"));

    assert!(save_weights(&weights, dir.path().join("w.xlsx")).is_err());
    Ok(())
  }
}
