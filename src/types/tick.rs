use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TagId;

/// Heading of one tag for one aggregation tick.
///
/// `yaw_degrees` is `None` when the tag is excluded from the tick
/// (disconnected, failed, or warming up again after a reconnect).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub tag_id: TagId,
    pub yaw_degrees: Option<f64>,
}

/// One synchronized output per period, one sample per configured tag in
/// registration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateTick {
    /// Unix seconds.
    pub timestamp: f64,
    pub samples: Vec<OrientationSample>,
}

impl AggregateTick {
    pub fn yaws(&self) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.yaw_degrees).collect()
    }

    pub fn included_count(&self) -> usize {
        self.samples.iter().filter(|s| s.yaw_degrees.is_some()).count()
    }

    /// Publisher wire form with a freshly generated identifier.
    pub fn to_payload(&self) -> TickPayload {
        TickPayload {
            id: Uuid::new_v4(),
            data: self.yaws(),
        }
    }
}

/// `{"id": "<uuid>", "data": [yaw_1, ..., yaw_n]}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    pub id: Uuid,
    pub data: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> AggregateTick {
        AggregateTick {
            timestamp: 1_700_000_000.5,
            samples: vec![
                OrientationSample { tag_id: "a".into(), yaw_degrees: Some(12.5) },
                OrientationSample { tag_id: "b".into(), yaw_degrees: None },
                OrientationSample { tag_id: "c".into(), yaw_degrees: Some(-3.25) },
            ],
        }
    }

    #[test]
    fn test_payload_keeps_order_and_nulls() {
        let payload = tick().to_payload();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["data"], serde_json::json!([12.5, null, -3.25]));
        let id = json["id"].as_str().unwrap();
        assert_eq!(Uuid::parse_str(id).unwrap(), payload.id);
    }

    #[test]
    fn test_payload_ids_are_unique() {
        let t = tick();
        assert_ne!(t.to_payload().id, t.to_payload().id);
    }

    #[test]
    fn test_included_count() {
        assert_eq!(tick().included_count(), 2);
        assert_eq!(tick().yaws().len(), 3);
    }
}
