use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// `HeaderMap` <-> `{ "name": "value" | ["v1", "v2"] }`
///
/// Repeated headers keep every value in order; single values stay plain strings
/// so exported documents read naturally.
pub mod header_map {
    use super::*;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map: BTreeMap<&str, OneOrMany> = BTreeMap::new();
        for name in headers.keys() {
            let mut values: Vec<String> = headers
                .get_all(name)
                .iter()
                // Convert header value to string (lossy if not UTF-8)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            let entry = if values.len() == 1 {
                OneOrMany::One(values.remove(0))
            } else {
                OneOrMany::Many(values)
            };
            map.insert(name.as_str(), entry);
        }
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HeaderMap, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map: BTreeMap<String, OneOrMany> = BTreeMap::deserialize(deserializer)?;
        let mut headers = HeaderMap::new();
        for (k, v) in map {
            let Ok(name) = HeaderName::from_bytes(k.as_bytes()) else {
                continue;
            };
            let values = match v {
                OneOrMany::One(value) => vec![value],
                OneOrMany::Many(values) => values,
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wrapper {
        #[serde(with = "header_map")]
        headers: HeaderMap,
    }

    #[test]
    fn test_repeated_headers_survive() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let json = serde_json::to_value(Wrapper {
            headers: headers.clone(),
        })
        .unwrap();
        assert_eq!(json["headers"]["content-type"], "application/json");
        assert_eq!(json["headers"]["set-cookie"], serde_json::json!(["a=1", "b=2"]));

        let back: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(back.headers, headers);
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        let json = serde_json::json!({ "headers": { "bad name": "x", "accept": "*/*" } });
        let back: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(back.headers.len(), 1);
        assert_eq!(back.headers["accept"], "*/*");
    }
}
