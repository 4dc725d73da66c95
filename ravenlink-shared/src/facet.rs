// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of ravenlink.
//
// ravenlink is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// ravenlink is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with ravenlink.  If not,
// see <http://www.gnu.org/licenses/>.

//! Facet query results.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One bucket of a facet query
///
/// The aggregates are only present when the query asked for them; `None` means "not computed",
/// which is not the same thing as `Some(0.0)`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FacetValue {
    #[serde(rename = "Range")]
    pub range: String,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "Sum", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(rename = "Max", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(rename = "Min", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "Average", default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

impl FacetValue {
    pub fn new(range: impl Into<String>, count: u64) -> FacetValue {
        FacetValue {
            range: range.into(),
            count,
            ..Default::default()
        }
    }
    pub fn with_average(mut self, average: f64) -> FacetValue {
        self.average = Some(average);
        self
    }
    pub fn with_max(mut self, max: f64) -> FacetValue {
        self.max = Some(max);
        self
    }
    pub fn with_min(mut self, min: f64) -> FacetValue {
        self.min = Some(min);
        self
    }
    pub fn with_sum(mut self, sum: f64) -> FacetValue {
        self.sum = Some(sum);
        self
    }
}

impl Display for FacetValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - Count: {}, ", self.range, self.count)?;
        [
            ("Sum", self.sum),
            ("Max", self.max),
            ("Min", self.min),
            ("Average", self.average),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|value| (label, value)))
        .try_for_each(|(label, value)| write!(f, "{}: {:.6},", label, value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn computed_versus_absent() {
        let value: FacetValue =
            serde_json::from_str(r#"{"Range": "price < 10", "Count": 3, "Sum": 0.0}"#).unwrap();
        assert_eq!(value.sum, Some(0.0));
        assert_eq!(value.max, None);
        assert_eq!(value.min, None);
        assert_eq!(value.average, None);
        assert_eq!(format!("{}", value), "price < 10 - Count: 3, Sum: 0.000000,");
    }

    #[test]
    fn display() {
        assert_eq!(
            format!("{}", FacetValue::new("all", 0)),
            "all - Count: 0, "
        );
        assert_eq!(
            format!(
                "{}",
                FacetValue::new("x", 2).with_max(2.5).with_average(1.25)
            ),
            "x - Count: 2, Max: 2.500000,Average: 1.250000,"
        );
    }
}
