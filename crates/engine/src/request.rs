//! Inbound `/send-push` payload and its validation.

use serde::Deserialize;

use pushgate_common::error::AppError;

/// Raw request body. Every field is optional so that missing fields surface as
/// validation errors rather than deserialization failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendPushRequest {
    pub user_ids: Option<Vec<i32>>,
    pub sender_user_id: Option<i32>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<serde_json::Value>,
    pub tournament_id: Option<i32>,
}

/// A validated push request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    /// Distinct recipient ids, in first-seen order.
    pub user_ids: Vec<i32>,
    pub sender_user_id: i32,
    pub title: String,
    pub body: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub tournament_id: Option<i32>,
}

impl SendPushRequest {
    pub fn validate(self) -> Result<PushRequest, AppError> {
        let user_ids = match self.user_ids {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                return Err(AppError::Validation(
                    "user_ids must be a non-empty array".to_string(),
                ));
            }
        };

        let sender_user_id = self
            .sender_user_id
            .filter(|id| *id != 0)
            .ok_or_else(|| AppError::Validation("sender_user_id is required".to_string()))?;

        let title = self
            .title
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("title is required".to_string()))?;

        let body = self
            .body
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::Validation("body is required".to_string()))?;

        let data = match self.data {
            None | Some(serde_json::Value::Null) => serde_json::Map::new(),
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => {
                return Err(AppError::Validation(
                    "data must be a JSON object".to_string(),
                ));
            }
        };

        let mut distinct = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }

        Ok(PushRequest {
            user_ids: distinct,
            sender_user_id,
            title,
            body,
            data,
            tournament_id: self.tournament_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> SendPushRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_request() {
        let req = parse(json!({
            "user_ids": [1, 2, 2, 3],
            "sender_user_id": 9,
            "title": "T",
            "body": "B",
            "data": {"screen": "match"},
            "tournament_id": 42
        }))
        .validate()
        .unwrap();

        assert_eq!(req.user_ids, vec![1, 2, 3]);
        assert_eq!(req.sender_user_id, 9);
        assert_eq!(req.data["screen"], "match");
        assert_eq!(req.tournament_id, Some(42));
    }

    #[test]
    fn test_data_defaults_to_empty_object() {
        let req = parse(json!({"user_ids": [1], "sender_user_id": 9, "title": "T", "body": "B"}))
            .validate()
            .unwrap();
        assert!(req.data.is_empty());
        assert_eq!(req.tournament_id, None);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let cases = [
            json!({"sender_user_id": 9, "title": "T", "body": "B"}),
            json!({"user_ids": [], "sender_user_id": 9, "title": "T", "body": "B"}),
            json!({"user_ids": [1], "title": "T", "body": "B"}),
            json!({"user_ids": [1], "sender_user_id": 0, "title": "T", "body": "B"}),
            json!({"user_ids": [1], "sender_user_id": 9, "body": "B"}),
            json!({"user_ids": [1], "sender_user_id": 9, "title": "", "body": "B"}),
            json!({"user_ids": [1], "sender_user_id": 9, "title": "T"}),
            json!({"user_ids": [1], "sender_user_id": 9, "title": "T", "body": "B", "data": [1]}),
        ];

        for case in cases {
            let result = parse(case.clone()).validate();
            assert!(
                matches!(result, Err(AppError::Validation(_))),
                "expected validation error for {case}"
            );
        }
    }
}
