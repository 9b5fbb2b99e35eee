use serde::Deserialize;
use serde::Deserializer;
use serde::Serializer;

/// Round to 3 decimal places, the precision every rate and latency is carried at.
pub fn round3(v: f64) -> f64 {
  (v * 1000.0).round() / 1000.0
}

pub(crate) fn ser_3dp<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_f64(round3(*v))
}

pub(crate) fn ser_opt_3dp<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
  match v {
    Some(v) => s.serialize_some(&round3(*v)),
    None => s.serialize_none(),
  }
}

// Older run archives store profiler counters as strings (e.g. `"cycles": "123456"`), so counters accept either.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
  Int(u64),
  Float(f64),
  Text(String),
}

impl Lenient {
  fn as_f64(&self) -> Option<f64> {
    match self {
      Lenient::Int(v) => Some(*v as f64),
      Lenient::Float(v) => Some(*v),
      Lenient::Text(s) => s.trim().parse().ok(),
    }
  }

  fn as_u64(&self) -> Option<u64> {
    match self {
      Lenient::Int(v) => Some(*v),
      Lenient::Text(s) if s.trim().parse::<u64>().is_ok() => s.trim().parse().ok(),
      _ => self.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64),
    }
  }
}

pub(crate) fn de_lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
  Ok(Option::<Lenient>::deserialize(d)?.and_then(|v| v.as_u64()))
}

pub(crate) fn de_lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
  Ok(Option::<Lenient>::deserialize(d)?.and_then(|v| v.as_f64()))
}
