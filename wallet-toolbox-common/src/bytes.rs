//! The `bytes` <-> `list[int]` JSON boundary convention: internally we
//! carry `Vec<u8>`; at the wire boundary we convert once, in both
//! directions, rather than threading `list[int]` through internal APIs.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(bytes.iter().map(|b| *b as u16))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let ints = Vec::<u16>::deserialize(deserializer)?;
    ints.into_iter()
        .map(|i| {
            u8::try_from(i).map_err(|_| serde::de::Error::custom(format!("byte out of range: {i}")))
        })
        .collect()
}

pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => super::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let ints: Option<Vec<u16>> = Option::deserialize(deserializer)?;
        match ints {
            None => Ok(None),
            Some(ints) => {
                let bytes = ints
                    .into_iter()
                    .map(|i| {
                        u8::try_from(i)
                            .map_err(|_| serde::de::Error::custom(format!("byte out of range: {i}")))
                    })
                    .collect::<Result<Vec<u8>, D::Error>>()?;
                Ok(Some(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        data: Vec<u8>,
    }

    #[test]
    fn roundtrips_through_list_of_int() {
        let w = Wrapper {
            data: vec![0, 1, 254, 255],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":[0,1,254,255]}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, w.data);
    }
}
