// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Include/exclude matching on formatted lines.
//!
//! A filter is a list of `key:value` pairs. A pair matches a line when the line contains
//! either the JSON form `"key":"value"` or the tag form `key=value ` (with the trailing
//! space), so the same filter applies to log records and to carbon2 metric lines.

use std::collections::BTreeMap;

use crate::errors::ConfigurationError;

/// Splits a `k1:v1,k2:v2` setting into pairs, in order.
///
/// Each entry is split on its first `:`, so values may contain colons. Blank entries are
/// skipped.
pub fn parse_key_values(
    setting: &str,
    csv: &str,
) -> Result<Vec<(String, String)>, ConfigurationError> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigurationError::MalformedPair {
                setting: setting.to_string(),
                entry: entry.to_string(),
            }),
        })
        .collect()
}

fn group_by_key(pairs: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key).or_default().push(value);
    }
    grouped
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentFilter {
    include: BTreeMap<String, Vec<String>>,
    exclude: BTreeMap<String, Vec<String>>,
}

impl ContentFilter {
    pub fn parse(include: &str, exclude: &str) -> Result<Self, ConfigurationError> {
        Ok(ContentFilter {
            include: group_by_key(parse_key_values("include_only_matching_filter", include)?),
            exclude: group_by_key(parse_key_values("exclude_always_matching_filter", exclude)?),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a formatted line should be shipped.
    ///
    /// Every include key present in the line must match one of its values. Keys absent from
    /// the line do not constrain it. Any exclude match rejects the line, whatever the include
    /// filter says.
    #[must_use]
    pub fn wants(&self, line: &str) -> bool {
        for (key, values) in &self.include {
            if key_present(line, key) && !values.iter().any(|value| pair_matches(line, key, value))
            {
                return false;
            }
        }
        !self.exclude.iter().any(|(key, values)| {
            key_present(line, key) && values.iter().any(|value| pair_matches(line, key, value))
        })
    }
}

fn key_present(line: &str, key: &str) -> bool {
    line.contains(&format!("\"{key}\":\"")) || line.contains(&format!("{key}="))
}

fn pair_matches(line: &str, key: &str, value: &str) -> bool {
    line.contains(&format!("\"{key}\":\"{value}\"")) || line.contains(&format!("{key}={value} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_ID: &str = "7833dc75-4484-409c-9b74-90b6454906c6";

    // Record as shipped with verbose log messages turned off: no source_type field.
    fn log_record() -> String {
        format!(
            r#"{{"Fields":{{"cf_app_id":"{APP_ID}","deployment":"cf","ip":"10.193.166.47","job":"diego_cell","job_index":"c62aebe5-16b8-43f5-a589-1267e09b9537","origin":"rep","timestamp":"2017-01-05 15:21:02.001580569 +0000 UTC"}},"Msg":"Triggering 'app usage events fetcher'","Type":"LogMessage"}}"#
        )
    }

    fn verbose_log_record() -> String {
        log_record().replace(r#""origin":"rep","#, r#""origin":"rep","source_type":"APP","#)
    }

    fn metric_line() -> &'static str {
        "deployment=cf-redis job_index=8081eca4 ip=10.193.166.84 job=dedicated-node origin=rep metric=dropsondeMarshaller.sentEnvelopes_total  10249446 1483629662"
    }

    #[test]
    fn test_parse_key_values() {
        assert_eq!(
            parse_key_values("custom_metadata", "Key1:Value1,Key2:Value2, Key3:Value3").unwrap(),
            vec![
                ("Key1".to_string(), "Value1".to_string()),
                ("Key2".to_string(), "Value2".to_string()),
                ("Key3".to_string(), "Value3".to_string()),
            ]
        );
        assert!(parse_key_values("custom_metadata", "").unwrap().is_empty());
    }

    #[test]
    fn test_parse_key_values_keeps_colons_in_value() {
        assert_eq!(
            parse_key_values("custom_metadata", "url:http://host:8080").unwrap(),
            vec![("url".to_string(), "http://host:8080".to_string())]
        );
    }

    #[test]
    fn test_parse_key_values_rejects_malformed_entries() {
        for csv in ["novalue", "a:b,:c"] {
            let err = parse_key_values("custom_metadata", csv).unwrap_err();
            assert!(
                matches!(err, ConfigurationError::MalformedPair { ref setting, .. } if setting == "custom_metadata"),
                "{csv}: {err}"
            );
        }
    }

    #[test]
    fn test_no_filter_passes_everything() {
        let filter = ContentFilter::parse("", "").unwrap();
        assert!(filter.is_empty());
        assert!(filter.wants(&verbose_log_record()));
        assert!(filter.wants(metric_line()));
    }

    #[test]
    fn test_include_only_filter() {
        let filter = ContentFilter::parse("job:diego_cell,source_type:other", "").unwrap();
        assert!(filter.wants(&log_record()));
    }

    #[test]
    fn test_include_rejects_present_key_with_other_value() {
        let filter = ContentFilter::parse("job:diego_cell,source_type:other", "").unwrap();
        assert!(!filter.wants(&verbose_log_record()));

        let filter = ContentFilter::parse("source_type:other,source_type:APP", "").unwrap();
        assert!(filter.wants(&verbose_log_record()));
    }

    #[test]
    fn test_exclude_always_filter() {
        let filter =
            ContentFilter::parse("", &format!("source_type:other,cf_app_id:{APP_ID}")).unwrap();
        assert!(!filter.wants(&log_record()));
    }

    #[test]
    fn test_exclude_overrides_include() {
        let filter = ContentFilter::parse(
            "job:diego_cell,source_type:other",
            &format!("source_type:other,cf_app_id:{APP_ID}"),
        )
        .unwrap();
        assert!(!filter.wants(&log_record()));
    }

    #[test]
    fn test_include_with_non_matching_exclude() {
        let filter =
            ContentFilter::parse("job:diego_cell,source_type:other", "source_type:other,origin:router")
                .unwrap();
        assert!(filter.wants(&log_record()));
    }

    #[test]
    fn test_tag_form_exclude() {
        let filter =
            ContentFilter::parse("job:dedicated-node,source_type:other", "source_type:other,origin:rep")
                .unwrap();
        assert!(!filter.wants(metric_line()));
    }

    #[test]
    fn test_tag_form_requires_trailing_space() {
        let filter =
            ContentFilter::parse("job:dedicated-node,source_type:other", "source_type:other,origin:reps")
                .unwrap();
        assert!(filter.wants(metric_line()));
    }
}
