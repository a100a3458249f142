use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::instrument;

use crate::{
    error::{ClientError, ClientResult},
    models::{
        events::unique_in_order, validate_model_id, RecommendationRow, ResultTable, ScoredItem, SubjectRequest,
        UserInput,
    },
    services::{
        dispatcher::{ApiRequest, AuthKey, Dispatcher, Verb},
        normalizer::normalize,
    },
};

/// Subject column of a user recommendation table
pub const USER_KEY: &str = "user";
/// Subject column of an item recommendation table
pub const ITEM_KEY: &str = "item";

/// Issues one `recommend` call per subject and shapes the results
///
/// Calls run up to `max_concurrent` at a time. Output rows follow input order
/// regardless of completion order, and any failed call fails the batch.
pub struct RecommendationBatcher<'a> {
    dispatcher: &'a dyn Dispatcher,
    model_id: &'a str,
    max_concurrent: usize,
}

impl<'a> RecommendationBatcher<'a> {
    pub fn new(dispatcher: &'a dyn Dispatcher, model_id: &'a str, max_concurrent: usize) -> Self {
        Self {
            dispatcher,
            model_id,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Recommendations for users, by id or from supplied transactions
    #[instrument(skip(self, input), fields(model_id = %self.model_id))]
    pub async fn user_recommendations(&self, input: UserInput, k: usize) -> ClientResult<ResultTable> {
        validate_count(k)?;
        validate_model_id(self.model_id)?;

        let subject_key = input.is_identified().then_some(USER_KEY);
        let calls = input
            .into_requests()?
            .into_iter()
            .map(|request| Ok((request.user_id.clone(), self.user_request(request, k)?)))
            .collect::<ClientResult<Vec<_>>>()?;

        let rows = self.fetch_all(calls, k).await?;
        Ok(normalize(&rows, k, subject_key))
    }

    /// Items similar to each of `items`
    #[instrument(skip(self, items), fields(model_id = %self.model_id))]
    pub async fn item_recommendations(&self, items: Vec<String>, k: usize) -> ClientResult<ResultTable> {
        validate_count(k)?;
        validate_model_id(self.model_id)?;

        let items = unique_in_order(items);
        if items.is_empty() {
            return Err(ClientError::InvalidInput(
                "At least one item id must be supplied".to_string(),
            ));
        }

        let calls = items
            .into_iter()
            .map(|item| {
                let request = ApiRequest::new(Verb::Get, self.operation(), AuthKey::Recommendation)
                    .with_query("itemId", &item)
                    .with_query("recommendationCount", k);
                (Some(item), request)
            })
            .collect();

        let rows = self.fetch_all(calls, k).await?;
        Ok(normalize(&rows, k, Some(ITEM_KEY)))
    }

    fn operation(&self) -> String {
        format!("{}/recommend", self.model_id)
    }

    fn user_request(&self, request: SubjectRequest, k: usize) -> ClientResult<ApiRequest> {
        let mut api_request = ApiRequest::new(Verb::Post, self.operation(), AuthKey::Recommendation)
            .with_query("recommendationCount", k);

        if let Some(user_id) = &request.user_id {
            api_request = api_request.with_query("userId", user_id);
        }
        if !request.events.is_empty() {
            api_request = api_request.with_body(serde_json::to_value(&request.events)?);
        }

        Ok(api_request)
    }

    async fn fetch_all(
        &self,
        calls: Vec<(Option<String>, ApiRequest)>,
        k: usize,
    ) -> ClientResult<Vec<RecommendationRow>> {
        let subjects = calls.len();

        let rows: Vec<RecommendationRow> = stream::iter(calls)
            .map(|(subject, request)| async move {
                let response = self.dispatcher.dispatch(request).await?;
                let recommendations = parse_recommendations(response)?;

                if recommendations.len() > k {
                    tracing::debug!(
                        subject = subject.as_deref().unwrap_or("anonymous"),
                        returned = recommendations.len(),
                        requested = k,
                        "Service returned more recommendations than requested"
                    );
                }

                Ok::<_, ClientError>(RecommendationRow {
                    subject,
                    recommendations,
                })
            })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        tracing::info!(
            subjects,
            requested = k,
            "Recommendation batch completed"
        );

        Ok(rows)
    }
}

fn validate_count(k: usize) -> ClientResult<()> {
    if k == 0 {
        return Err(ClientError::InvalidInput(
            "Recommendation count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Decode a `recommend` reply: a bare list, or a list wrapped in an object
fn parse_recommendations(response: Value) -> ClientResult<Vec<ScoredItem>> {
    let list = match response {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => {
            match map
                .remove("recommendations")
                .or_else(|| map.remove("recommendedItems"))
            {
                Some(Value::Null) => return Ok(Vec::new()),
                Some(list) => list,
                None => {
                    return Err(ClientError::Decode(format!(
                        "Recommendation reply has no recommendation list: {}",
                        Value::Object(map)
                    )))
                }
            }
        }
        other => {
            return Err(ClientError::Decode(format!(
                "Unexpected recommendation payload: {}",
                other
            )))
        }
    };

    serde_json::from_value(list)
        .map_err(|e| ClientError::Decode(format!("Invalid recommendation list: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, UsageEvent, UserEvents};
    use crate::services::dispatcher::MockDispatcher;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Replies after a per-subject delay, recording completion order
    struct DelayedDispatcher {
        delays: Vec<(&'static str, u64)>,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Dispatcher for DelayedDispatcher {
        async fn dispatch(&self, request: ApiRequest) -> ClientResult<Value> {
            let item = request.query_value("itemId").unwrap_or_default().to_string();
            let delay = self
                .delays
                .iter()
                .find(|(id, _)| *id == item)
                .map_or(0, |(_, ms)| *ms);

            tokio::time::sleep(Duration::from_millis(delay)).await;
            let rec = format!("{}-rec", item);
            self.completed.lock().unwrap().push(item);
            Ok(recs(&[(rec.as_str(), 0.5)]))
        }
    }

    fn recs(items: &[(&str, f64)]) -> Value {
        Value::Array(
            items
                .iter()
                .map(|(id, score)| json!({ "itemId": id, "score": score }))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_user_scenario_with_padding() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch()
            .withf(|r| {
                r.verb == Verb::Post
                    && r.operation == "m1/recommend"
                    && r.key == AuthKey::Recommendation
                    && r.query_value("recommendationCount") == Some("3")
                    && r.body.is_none()
            })
            .times(2)
            .returning(|r| match r.query_value("userId") {
                Some("u1") => Ok(recs(&[("id_a", 0.9), ("id_b", 0.7)])),
                _ => Ok(json!([])),
            });

        let batcher = RecommendationBatcher::new(&mock, "m1", 4);
        let table = batcher
            .user_recommendations(UserInput::users(["u1", "u2"]), 3)
            .await
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.width(), 7);
        assert_eq!(table.columns[0], "user");

        let u1 = &table.rows[0];
        assert_eq!(u1[0].as_text(), Some("u1"));
        assert_eq!(u1[1].as_text(), Some("id_a"));
        assert_eq!(u1[2].as_score(), Some(0.9));
        assert_eq!(u1[3].as_text(), Some("id_b"));
        assert_eq!(u1[4].as_score(), Some(0.7));
        assert!(u1[5].is_absent() && u1[6].is_absent());

        let u2 = &table.rows[1];
        assert_eq!(u2[0].as_text(), Some("u2"));
        assert!(u2[1..].iter().all(Cell::is_absent));
    }

    #[tokio::test]
    async fn test_duplicate_users_requested_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let mut mock = MockDispatcher::new();
        mock.expect_dispatch().times(3).returning(move |r| {
            log.lock()
                .unwrap()
                .push(r.query_value("userId").unwrap_or_default().to_string());
            Ok(recs(&[("x", 0.1)]))
        });

        let batcher = RecommendationBatcher::new(&mock, "m1", 1);
        let table = batcher
            .user_recommendations(UserInput::users(["b", "a", "b", "c", "a"]), 1)
            .await
            .unwrap();

        let subjects: Vec<_> = table.rows.iter().map(|r| r[0].as_text()).collect();
        assert_eq!(subjects, vec![Some("b"), Some("a"), Some("c")]);
        assert_eq!(*seen.lock().unwrap(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_anonymous_transactions_single_call() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch()
            .withf(|r| {
                r.query_value("userId").is_none()
                    && r.body
                        == Some(json!([
                            { "itemId": "sku-1" },
                            { "itemId": "sku-2", "eventType": "Purchase" }
                        ]))
            })
            .times(1)
            .returning(|_| Ok(recs(&[("sku-3", 0.8)])));

        let mut purchase = UsageEvent::new("sku-2");
        purchase.event_type = Some("Purchase".to_string());
        let input = UserInput::Anonymous(vec![UsageEvent::new("sku-1"), purchase]);

        let batcher = RecommendationBatcher::new(&mock, "m1", 4);
        let table = batcher.user_recommendations(input, 2).await.unwrap();

        assert_eq!(table.columns, vec!["rec1", "score1", "rec2", "score2"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0][0].as_text(), Some("sku-3"));
    }

    #[tokio::test]
    async fn test_per_user_transactions_sent_as_body() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch()
            .withf(|r| {
                r.query_value("userId") == Some("bob")
                    && r.body == Some(json!([{ "itemId": "sku-1", "weight": 2.0 }]))
            })
            .times(1)
            .returning(|_| Ok(json!([])));

        let mut event = UsageEvent::new("sku-1");
        event.weight = Some(2.0);
        let input = UserInput::PerUser(vec![UserEvents {
            user_id: "bob".to_string(),
            events: vec![event],
        }]);

        let batcher = RecommendationBatcher::new(&mock, "m1", 4);
        let table = batcher.user_recommendations(input, 1).await.unwrap();
        assert_eq!(table.rows[0][0].as_text(), Some("bob"));
    }

    #[tokio::test]
    async fn test_item_scenario_full_results() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch()
            .withf(|r| {
                r.verb == Verb::Get
                    && r.operation == "m1/recommend"
                    && r.key == AuthKey::Recommendation
                    && r.query_value("recommendationCount") == Some("2")
                    && r.body.is_none()
            })
            .times(2)
            .returning(|r| match r.query_value("itemId") {
                Some("x") => Ok(recs(&[("x1", 0.9), ("x2", 0.8)])),
                _ => Ok(recs(&[("y1", 0.7), ("y2", 0.6)])),
            });

        let batcher = RecommendationBatcher::new(&mock, "m1", 4);
        let table = batcher
            .item_recommendations(vec!["x".to_string(), "y".to_string()], 2)
            .await
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.width(), 5);
        assert_eq!(table.columns, vec!["item", "rec1", "score1", "rec2", "score2"]);
        assert!(table.rows.iter().flatten().all(|c| !c.is_absent()));
        assert_eq!(table.rows[1][0].as_text(), Some("y"));
        assert_eq!(table.rows[1][3].as_text(), Some("y2"));
    }

    #[tokio::test]
    async fn test_empty_items_rejected() {
        let mock = MockDispatcher::new();
        let batcher = RecommendationBatcher::new(&mock, "m1", 4);

        let result = batcher.item_recommendations(vec![], 3).await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_user_input_rejected() {
        let mock = MockDispatcher::new();
        let batcher = RecommendationBatcher::new(&mock, "m1", 4);

        let result = batcher.user_recommendations(UserInput::Users(vec![]), 3).await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));

        let result = batcher
            .user_recommendations(UserInput::Anonymous(vec![]), 3)
            .await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_reserved_characters_in_model_id_rejected() {
        let mock = MockDispatcher::new();
        let batcher = RecommendationBatcher::new(&mock, "m1?debug=1", 4);

        let result = batcher
            .item_recommendations(vec!["x".to_string()], 2)
            .await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_zero_count_rejected() {
        let mock = MockDispatcher::new();
        let batcher = RecommendationBatcher::new(&mock, "m1", 4);

        let result = batcher
            .item_recommendations(vec!["x".to_string()], 0)
            .await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_one_failure_fails_batch() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch().returning(|r| match r.query_value("itemId") {
            Some("bad") => Err(ClientError::Service {
                status: 404,
                body: "unknown item".to_string(),
            }),
            _ => Ok(recs(&[("z", 0.5)])),
        });

        let batcher = RecommendationBatcher::new(&mock, "m1", 2);
        let result = batcher
            .item_recommendations(
                vec!["ok".to_string(), "bad".to_string(), "ok2".to_string()],
                1,
            )
            .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_follow_input_order_not_completion_order() {
        let dispatcher = DelayedDispatcher {
            delays: vec![("first", 300), ("second", 200), ("third", 100), ("fourth", 0)],
            completed: Mutex::new(Vec::new()),
        };

        let batcher = RecommendationBatcher::new(&dispatcher, "m1", 4);
        let table = batcher
            .item_recommendations(
                vec![
                    "first".to_string(),
                    "second".to_string(),
                    "third".to_string(),
                    "fourth".to_string(),
                ],
                1,
            )
            .await
            .unwrap();

        assert_eq!(
            *dispatcher.completed.lock().unwrap(),
            vec!["fourth", "third", "second", "first"]
        );

        let subjects: Vec<_> = table.rows.iter().map(|r| r[0].as_text()).collect();
        assert_eq!(
            subjects,
            vec![Some("first"), Some("second"), Some("third"), Some("fourth")]
        );
        assert_eq!(table.rows[0][1].as_text(), Some("first-rec"));
        assert_eq!(table.rows[3][1].as_text(), Some("fourth-rec"));
    }

    #[tokio::test]
    async fn test_reply_without_list_fails_batch() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch()
            .times(1)
            .returning(|_| Ok(json!({ "error": "quota exceeded" })));

        let batcher = RecommendationBatcher::new(&mock, "m1", 4);
        let result = batcher.item_recommendations(vec!["x".to_string()], 2).await;

        assert!(matches!(result, Err(ClientError::Decode(_))));
    }

    #[test]
    fn test_parse_recommendations_shapes() {
        assert!(parse_recommendations(Value::Null).unwrap().is_empty());
        assert_eq!(parse_recommendations(recs(&[("a", 0.1)])).unwrap().len(), 1);
        assert_eq!(
            parse_recommendations(json!({
                "recommendedItems": [{ "recommendedItemId": "a", "score": 0.1 }]
            }))
            .unwrap()[0]
                .item_id,
            "a"
        );
        assert!(parse_recommendations(json!({ "recommendations": null }))
            .unwrap()
            .is_empty());
        assert!(matches!(
            parse_recommendations(json!({})),
            Err(ClientError::Decode(_))
        ));
        assert!(parse_recommendations(json!("oops")).is_err());
        assert!(parse_recommendations(json!([{ "score": 0.1 }])).is_err());
    }
}
