//! Subscription types and their NGSIv2 wire representation.

use crate::error::{ClientError, Result};
use crate::query::{compile, GeoQuery, QueryExpression};
use crate::types::{AttrsFormat, EntityPattern};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier assigned by the broker when a subscription is created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wrap a broker-assigned id. Empty ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ClientError::Validation(format!(
                "invalid subscription id {:?}",
                id
            )));
        }
        Ok(SubscriptionId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle assigned locally at creation, before the broker answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Created locally, broker has not acknowledged yet.
    Pending,
    Active,
    /// Rejected by the broker. Terminal.
    Failed,
    /// Past its expiry date.
    Expired,
    /// Deleted or abandoned. Terminal.
    Deleted,
}

impl SubscriptionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriptionStatus::Failed | SubscriptionStatus::Deleted)
    }
}

/// Where the broker delivers notifications. Exactly one per subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationTarget {
    Http { url: String },
    /// `url` is the MQTT broker endpoint (`mqtt://host:port`).
    Mqtt { url: String, topic: String, qos: u8 },
    /// HTTP delivery with extra headers, query parameters, method or body.
    HttpCustom(HttpCustomEndpoint),
    /// MQTT delivery with a custom message body.
    MqttCustom(MqttCustomEndpoint),
}

impl NotificationTarget {
    pub fn http(url: impl Into<String>) -> Self {
        NotificationTarget::Http { url: url.into() }
    }

    pub fn mqtt(url: impl Into<String>, topic: impl Into<String>) -> Self {
        NotificationTarget::Mqtt {
            url: url.into(),
            topic: topic.into(),
            qos: 0,
        }
    }

    /// Topic notifications arrive on, for MQTT targets.
    pub fn mqtt_topic(&self) -> Option<&str> {
        match self {
            NotificationTarget::Mqtt { topic, .. } => Some(topic.as_str()),
            NotificationTarget::MqttCustom(endpoint) => Some(endpoint.topic.as_str()),
            NotificationTarget::Http { .. } | NotificationTarget::HttpCustom(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            NotificationTarget::Http { url } => validate_http_url(url),
            NotificationTarget::Mqtt { url, topic, qos } => validate_mqtt(url, topic, *qos),
            NotificationTarget::HttpCustom(endpoint) => endpoint.validate(),
            NotificationTarget::MqttCustom(endpoint) => {
                validate_mqtt(&endpoint.url, &endpoint.topic, endpoint.qos)
            }
        }
    }
}

impl From<HttpCustomEndpoint> for NotificationTarget {
    fn from(endpoint: HttpCustomEndpoint) -> Self {
        NotificationTarget::HttpCustom(endpoint)
    }
}

impl From<MqttCustomEndpoint> for NotificationTarget {
    fn from(endpoint: MqttCustomEndpoint) -> Self {
        NotificationTarget::MqttCustom(endpoint)
    }
}

fn parse_url(url: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse(url)
        .map_err(|e| ClientError::Validation(format!("invalid url {:?}: {}", url, e)))
}

fn validate_http_url(url: &str) -> Result<()> {
    let parsed = parse_url(url)?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(ClientError::Validation(format!(
            "notification url {:?} must be an absolute http(s) url",
            url
        )));
    }
    Ok(())
}

fn validate_mqtt(url: &str, topic: &str, qos: u8) -> Result<()> {
    let parsed = parse_url(url)?;
    if !matches!(parsed.scheme(), "mqtt" | "mqtts")
        || !parsed.has_host()
        || !matches!(parsed.path(), "" | "/")
    {
        return Err(ClientError::Validation(format!(
            "mqtt url {:?} must be mqtt://host[:port] without a path",
            url
        )));
    }
    if topic.is_empty() || !topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '/') {
        return Err(ClientError::Validation(format!(
            "mqtt topic {:?} may only contain letters, digits and '/'",
            topic
        )));
    }
    if qos > 2 {
        return Err(ClientError::Validation(format!("mqtt qos {} out of range", qos)));
    }
    Ok(())
}

/// Method the broker uses for custom HTTP notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

/// `httpCustom` endpoint: the broker adds `headers` and `qs` to every
/// notification and sends `payload` instead of the default body when set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCustomEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qs: BTreeMap<String, String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl HttpCustomEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            qs: BTreeMap::new(),
            method: HttpMethod::Post,
            payload: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.qs.insert(name.into(), value.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    fn validate(&self) -> Result<()> {
        validate_http_url(&self.url)?;
        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::Validation(format!("invalid header name {:?}", name)))?;
            reqwest::header::HeaderValue::from_str(value).map_err(|_| {
                ClientError::Validation(format!("invalid value for header {:?}", name))
            })?;
        }
        if let Some(key) = self.qs.keys().find(|k| k.is_empty()) {
            return Err(ClientError::Validation(format!(
                "invalid query parameter name {:?}",
                key
            )));
        }
        Ok(())
    }
}

/// `mqttCustom` endpoint: an MQTT target with a custom message body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttCustomEndpoint {
    pub url: String,
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl MqttCustomEndpoint {
    pub fn new(url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topic: topic.into(),
            qos: 0,
            payload: None,
        }
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Whether the broker sends notifications for a subscription. Settable by
/// the client; the broker itself may report `expired` or `failed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    #[default]
    Active,
    Inactive,
}

/// Trigger condition of a subscription.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    /// Attributes whose change triggers a notification (empty = any).
    pub attrs: Vec<String>,
    pub expression: Option<QueryExpression>,
    pub geo: Option<GeoQuery>,
}

/// What a subscription watches.
#[derive(Clone, Debug, PartialEq)]
pub struct Subject {
    pub entities: Vec<EntityPattern>,
    pub condition: Condition,
}

impl Subject {
    /// Every entity of a type.
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entities: vec![EntityPattern::of_type(entity_type)],
            condition: Condition::default(),
        }
    }

    pub fn new(entities: Vec<EntityPattern>) -> Self {
        Self {
            entities,
            condition: Condition::default(),
        }
    }

    pub fn with_expression(mut self, expression: QueryExpression) -> Self {
        self.condition.expression = Some(expression);
        self
    }

    pub fn with_geo(mut self, geo: GeoQuery) -> Self {
        self.condition.geo = Some(geo);
        self
    }

    pub fn with_condition_attrs(mut self, attrs: Vec<String>) -> Self {
        self.condition.attrs = attrs;
        self
    }
}

/// Everything needed to register a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionRequest {
    pub description: Option<String>,
    pub subject: Subject,
    pub target: NotificationTarget,
    /// Minimum seconds between two notifications.
    pub throttling: Option<u64>,
    pub expires: Option<DateTime<Utc>>,
    /// Attributes included in notifications (empty = all).
    pub attrs: Vec<String>,
    /// Attributes excluded from notifications. Exclusive with `attrs`.
    pub except_attrs: Vec<String>,
    pub attrs_format: AttrsFormat,
    /// Metadata included in notifications (empty = broker default).
    pub metadata: Vec<String>,
    pub status: ActivationStatus,
}

impl SubscriptionRequest {
    pub fn new(subject: Subject, target: NotificationTarget) -> Self {
        Self {
            description: None,
            subject,
            target,
            throttling: None,
            expires: None,
            attrs: Vec::new(),
            except_attrs: Vec::new(),
            attrs_format: AttrsFormat::Normalized,
            metadata: Vec::new(),
            status: ActivationStatus::Active,
        }
    }

    pub fn with_throttling(mut self, seconds: u64) -> Self {
        self.throttling = Some(seconds);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_attrs_format(mut self, format: AttrsFormat) -> Self {
        self.attrs_format = format;
        self
    }

    pub fn with_attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_except_attrs(mut self, attrs: Vec<String>) -> Self {
        self.except_attrs = attrs;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_status(mut self, status: ActivationStatus) -> Self {
        self.status = status;
        self
    }

    /// Validate and render the broker request body.
    ///
    /// Query compilation happens here, so grammar errors surface before
    /// anything is sent.
    pub fn to_payload(&self) -> Result<SubscriptionPayload> {
        if self.subject.entities.is_empty() {
            return Err(ClientError::Validation(
                "subscription subject needs at least one entity pattern".to_string(),
            ));
        }
        for pattern in &self.subject.entities {
            pattern.validate()?;
        }
        if !self.attrs.is_empty() && !self.except_attrs.is_empty() {
            return Err(ClientError::Validation(
                "attrs and exceptAttrs are mutually exclusive".to_string(),
            ));
        }
        self.target.validate()?;

        let q = match self.subject.condition.expression {
            Some(ref expr) if !expr.is_empty() => Some(compile(expr)?),
            _ => None,
        };
        let geo = match self.subject.condition.geo {
            Some(ref geo) => Some(geo.to_params()?),
            None => None,
        };

        let expression = if q.is_some() || geo.is_some() {
            Some(ExpressionPayload {
                q,
                georel: geo.as_ref().map(|g| g.georel.clone()),
                geometry: geo.as_ref().map(|g| g.geometry.clone()),
                coords: geo.map(|g| g.coords),
            })
        } else {
            None
        };

        let condition = if expression.is_some() || !self.subject.condition.attrs.is_empty() {
            Some(ConditionPayload {
                attrs: self.subject.condition.attrs.clone(),
                expression,
            })
        } else {
            None
        };

        let mut notification = NotificationPayload {
            http: None,
            http_custom: None,
            mqtt: None,
            mqtt_custom: None,
            attrs: self.attrs.clone(),
            except_attrs: self.except_attrs.clone(),
            attrs_format: self.attrs_format,
            metadata: self.metadata.clone(),
        };
        match self.target {
            NotificationTarget::Http { ref url } => {
                notification.http = Some(HttpEndpoint { url: url.clone() })
            }
            NotificationTarget::Mqtt {
                ref url,
                ref topic,
                qos,
            } => {
                notification.mqtt = Some(MqttEndpoint {
                    url: url.clone(),
                    topic: topic.clone(),
                    qos,
                })
            }
            NotificationTarget::HttpCustom(ref endpoint) => {
                notification.http_custom = Some(endpoint.clone())
            }
            NotificationTarget::MqttCustom(ref endpoint) => {
                notification.mqtt_custom = Some(endpoint.clone())
            }
        }

        Ok(SubscriptionPayload {
            description: self.description.clone(),
            subject: SubjectPayload {
                entities: self.subject.entities.clone(),
                condition,
            },
            notification,
            throttling: self.throttling,
            expires: self.expires,
            status: Some(self.status),
        })
    }
}

/// Changes to an existing subscription. Unset fields keep their value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionUpdate {
    pub description: Option<String>,
    pub target: Option<NotificationTarget>,
    pub throttling: Option<u64>,
    pub expires: Option<DateTime<Utc>>,
    pub expression: Option<QueryExpression>,
    pub condition_attrs: Option<Vec<String>>,
    pub geo: Option<GeoQuery>,
    /// Replaces the notified attributes. A non-empty list clears
    /// `except_attrs` unless that is set in the same update.
    pub attrs: Option<Vec<String>>,
    /// Replaces the excluded attributes. A non-empty list clears `attrs`
    /// unless that is set in the same update.
    pub except_attrs: Option<Vec<String>>,
    pub attrs_format: Option<AttrsFormat>,
    pub metadata: Option<Vec<String>>,
    pub status: Option<ActivationStatus>,
}

impl SubscriptionUpdate {
    /// The request as it reads after this update.
    pub fn apply_to(&self, request: &SubscriptionRequest) -> SubscriptionRequest {
        let mut updated = request.clone();
        if let Some(ref d) = self.description {
            updated.description = Some(d.clone());
        }
        if let Some(ref t) = self.target {
            updated.target = t.clone();
        }
        if let Some(t) = self.throttling {
            updated.throttling = Some(t);
        }
        if let Some(e) = self.expires {
            updated.expires = Some(e);
        }
        if let Some(ref expr) = self.expression {
            updated.subject.condition.expression = Some(expr.clone());
        }
        if let Some(ref attrs) = self.condition_attrs {
            updated.subject.condition.attrs = attrs.clone();
        }
        if let Some(ref geo) = self.geo {
            updated.subject.condition.geo = Some(geo.clone());
        }
        match (&self.attrs, &self.except_attrs) {
            (Some(attrs), None) => {
                updated.attrs = attrs.clone();
                if !attrs.is_empty() {
                    updated.except_attrs.clear();
                }
            }
            (None, Some(except)) => {
                updated.except_attrs = except.clone();
                if !except.is_empty() {
                    updated.attrs.clear();
                }
            }
            (Some(attrs), Some(except)) => {
                updated.attrs = attrs.clone();
                updated.except_attrs = except.clone();
            }
            (None, None) => {}
        }
        if let Some(format) = self.attrs_format {
            updated.attrs_format = format;
        }
        if let Some(ref metadata) = self.metadata {
            updated.metadata = metadata.clone();
        }
        if let Some(status) = self.status {
            updated.status = status;
        }
        updated
    }
}

/// Snapshot of a tracked subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Subscription {
    pub local_id: LocalId,
    /// Broker id; `None` until the broker acknowledges creation.
    pub id: Option<SubscriptionId>,
    pub request: SubscriptionRequest,
    pub status: SubscriptionStatus,
    /// Broker rejection reason, if the subscription failed.
    pub failure: Option<String>,
}

impl Subscription {
    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }
}

// --- Wire format ---

/// NGSIv2 subscription body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subject: SubjectPayload,
    pub notification: NotificationPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttling: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivationStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectPayload {
    pub entities: Vec<EntityPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionPayload>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<ExpressionPayload>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub georel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_custom: Option<HttpCustomEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_custom: Option<MqttCustomEndpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except_attrs: Vec<String>,
    #[serde(default)]
    pub attrs_format: AttrsFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<String>,
}

impl NotificationPayload {
    /// The single delivery endpoint of this body.
    ///
    /// `http`, `httpCustom`, `mqtt` and `mqttCustom` are mutually exclusive;
    /// a body with none or several of them is invalid.
    pub fn target(&self) -> Result<NotificationTarget> {
        let mut targets = Vec::with_capacity(1);
        if let Some(ref http) = self.http {
            targets.push(NotificationTarget::http(http.url.clone()));
        }
        if let Some(ref endpoint) = self.http_custom {
            targets.push(NotificationTarget::HttpCustom(endpoint.clone()));
        }
        if let Some(ref mqtt) = self.mqtt {
            targets.push(NotificationTarget::Mqtt {
                url: mqtt.url.clone(),
                topic: mqtt.topic.clone(),
                qos: mqtt.qos,
            });
        }
        if let Some(ref endpoint) = self.mqtt_custom {
            targets.push(NotificationTarget::MqttCustom(endpoint.clone()));
        }
        match targets.len() {
            1 => Ok(targets.remove(0)),
            0 => Err(ClientError::Validation(
                "notification needs one of http, httpCustom, mqtt or mqttCustom".to_string(),
            )),
            _ => Err(ClientError::Validation(
                "http, httpCustom, mqtt and mqttCustom are mutually exclusive".to_string(),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MqttEndpoint {
    pub url: String,
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Term;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room")
                .with_condition_attrs(vec!["temperature".into()])
                .with_expression(Term::gt("temperature", 40).into()),
            NotificationTarget::http("http://cb:1234/notify"),
        )
        .with_throttling(5)
        .with_attrs(vec!["temperature".into(), "humidity".into()]);

        let body = serde_json::to_value(request.to_payload().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "subject": {
                    "entities": [{"idPattern": ".*", "type": "Room"}],
                    "condition": {
                        "attrs": ["temperature"],
                        "expression": {"q": "temperature>40"}
                    }
                },
                "notification": {
                    "http": {"url": "http://cb:1234/notify"},
                    "attrs": ["temperature", "humidity"],
                    "attrsFormat": "normalized"
                },
                "throttling": 5,
                "status": "active"
            })
        );
    }

    #[test]
    fn test_mqtt_target_validation() {
        assert!(NotificationTarget::mqtt("mqtt://broker:1883", "fiware/rooms").validate().is_ok());
        assert!(NotificationTarget::mqtt("mqtt://broker:1883/path", "rooms").validate().is_err());
        assert!(NotificationTarget::mqtt("http://broker:1883", "rooms").validate().is_err());
        assert!(NotificationTarget::mqtt("mqtt://broker:1883", "rooms/#").validate().is_err());

        let bad_qos = NotificationTarget::Mqtt {
            url: "mqtt://broker".into(),
            topic: "rooms".into(),
            qos: 3,
        };
        assert!(bad_qos.validate().is_err());
    }

    #[test]
    fn test_http_target_validation() {
        assert!(NotificationTarget::http("https://example.org/notify").validate().is_ok());
        assert!(NotificationTarget::http("/notify").validate().is_err());
        assert!(NotificationTarget::http("ftp://example.org").validate().is_err());
    }

    #[test]
    fn test_grammar_error_surfaces_from_payload() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room").with_expression(Term::gt("temperature", true).into()),
            NotificationTarget::http("http://cb:1234/notify"),
        );
        assert!(matches!(request.to_payload(), Err(ClientError::Grammar { .. })));
    }

    #[test]
    fn test_attrs_exclusive() {
        let mut request = SubscriptionRequest::new(
            Subject::of_type("Room"),
            NotificationTarget::http("http://cb:1234/notify"),
        );
        request.attrs = vec!["a".into()];
        request.except_attrs = vec!["b".into()];
        assert!(matches!(request.to_payload(), Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_update_merges() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room"),
            NotificationTarget::http("http://cb:1234/notify"),
        )
        .with_throttling(5);
        let update = SubscriptionUpdate {
            throttling: Some(10),
            description: Some("rooms".into()),
            ..Default::default()
        };
        let merged = update.apply_to(&request);
        assert_eq!(merged.throttling, Some(10));
        assert_eq!(merged.description.as_deref(), Some("rooms"));
        assert_eq!(merged.target, request.target);
    }

    #[test]
    fn test_http_custom_payload() {
        let target = HttpCustomEndpoint::new("https://app.example.org/notify")
            .with_header("Authorization", "Bearer s3cret")
            .with_query("source", "orion")
            .with_method(HttpMethod::Put)
            .with_payload("temperature changed");
        let request = SubscriptionRequest::new(Subject::of_type("Room"), target.into())
            .with_metadata(vec!["dateModified".into()])
            .with_status(ActivationStatus::Inactive);

        let body = serde_json::to_value(request.to_payload().unwrap()).unwrap();
        assert_eq!(
            body["notification"],
            json!({
                "httpCustom": {
                    "url": "https://app.example.org/notify",
                    "headers": {"Authorization": "Bearer s3cret"},
                    "qs": {"source": "orion"},
                    "method": "PUT",
                    "payload": "temperature changed"
                },
                "attrsFormat": "normalized",
                "metadata": ["dateModified"]
            })
        );
        assert_eq!(body["status"], "inactive");
    }

    #[test]
    fn test_custom_target_validation() {
        let bad_header = HttpCustomEndpoint::new("http://app/notify").with_header("bad header", "x");
        assert!(NotificationTarget::from(bad_header).validate().is_err());
        let bad_value = HttpCustomEndpoint::new("http://app/notify").with_header("X-Token", "a\nb");
        assert!(NotificationTarget::from(bad_value).validate().is_err());

        let mqtt = MqttCustomEndpoint::new("mqtt://broker:1883", "rooms").with_payload("alert");
        let target = NotificationTarget::from(mqtt.clone());
        assert!(target.validate().is_ok());
        assert_eq!(target.mqtt_topic(), Some("rooms"));
        assert!(NotificationTarget::from(mqtt.with_qos(3)).validate().is_err());
    }

    #[test]
    fn test_notification_endpoints_exclusive() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room"),
            MqttCustomEndpoint::new("mqtt://broker:1883", "rooms").into(),
        );
        let mut payload = request.to_payload().unwrap();
        assert!(matches!(
            payload.notification.target(),
            Ok(NotificationTarget::MqttCustom(_))
        ));

        payload.notification.http = Some(HttpEndpoint {
            url: "http://app/notify".into(),
        });
        assert!(matches!(payload.notification.target(), Err(ClientError::Validation(_))));

        payload.notification.http = None;
        payload.notification.mqtt_custom = None;
        assert!(matches!(payload.notification.target(), Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_update_switches_attribute_filter() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room"),
            NotificationTarget::http("http://cb:1234/notify"),
        )
        .with_except_attrs(vec!["secret".into()]);

        let update = SubscriptionUpdate {
            attrs: Some(vec!["temperature".into()]),
            ..Default::default()
        };
        let merged = update.apply_to(&request);
        assert_eq!(merged.attrs, vec!["temperature".to_string()]);
        assert!(merged.except_attrs.is_empty());
        assert!(merged.to_payload().is_ok());

        let clear = SubscriptionUpdate {
            except_attrs: Some(Vec::new()),
            ..Default::default()
        };
        assert!(clear.apply_to(&request).except_attrs.is_empty());

        let both = SubscriptionUpdate {
            attrs: Some(vec!["a".into()]),
            except_attrs: Some(vec!["b".into()]),
            ..Default::default()
        };
        assert!(both.apply_to(&request).to_payload().is_err());
    }

    #[test]
    fn test_update_geo_format_and_status() {
        let request = SubscriptionRequest::new(
            Subject::of_type("Room"),
            NotificationTarget::http("http://cb:1234/notify"),
        );
        let update = SubscriptionUpdate {
            geo: Some(GeoQuery::near_point(52.5547, 13.3986, 1000.0)),
            attrs_format: Some(AttrsFormat::KeyValues),
            metadata: Some(vec!["dateModified".into()]),
            status: Some(ActivationStatus::Inactive),
            ..Default::default()
        };
        let merged = update.apply_to(&request);
        let body = serde_json::to_value(merged.to_payload().unwrap()).unwrap();
        assert_eq!(
            body["subject"]["condition"]["expression"]["georel"],
            "near;maxDistance:1000"
        );
        assert_eq!(body["notification"]["attrsFormat"], "keyValues");
        assert_eq!(body["notification"]["metadata"], json!(["dateModified"]));
        assert_eq!(body["status"], "inactive");
    }

    #[test]
    fn test_empty_subscription_id_rejected() {
        assert!(SubscriptionId::new("").is_err());
        assert!(SubscriptionId::new("57458eb60962ef754e7c0998").is_ok());
    }
}
