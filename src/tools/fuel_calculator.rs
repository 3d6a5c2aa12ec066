//! Fuel/carbohydrate intake calculator backed by the Maurten simulation API.
//!
//! The request body is a baseline JSON template read from disk with the
//! athlete and race fields overlaid. Every failure collapses into
//! [`APOLOGY`] so the paused run always receives an output.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::CalculatorConfig;
use crate::tools::Tool;
use crate::tools::tool_def::ToolDef;

pub const TOOL_NAME: &str = "fuel_calculator";
pub const APOLOGY: &str = "Sorry the fuel calculator is not available at the moment.";
pub const HEADER_SUBSCRIPTION_KEY: &str = "Ocp-Apim-Subscription-Key";

#[derive(Error, Debug)]
pub enum CalculatorError {
    #[error("invalid tool arguments: {0}")]
    Arguments(serde_json::Error),

    #[error("failed to read request template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse request template: {0}")]
    TemplateParse(serde_json::Error),

    #[error("request template has no object at {0}")]
    TemplateShape(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("calculator error: {0} - {1}")]
    Status(StatusCode, String),

    #[error("failed to parse calculator response: {0}")]
    ResponseParse(serde_json::Error),

    #[error("calculator response is missing {0}")]
    MissingField(&'static str),
}

fn zero() -> Value {
    json!(0)
}

/// Arguments as sent by the assistant. Numbers are opaque and forwarded
/// as-is; absent ones default to `0`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FuelArgs {
    #[serde(default = "zero")]
    pub weight: Value,
    #[serde(default = "zero")]
    pub distance: Value,
    #[serde(default = "zero")]
    pub duration: Value,
    #[serde(default)]
    pub gender: Option<Value>,
}

impl FuelArgs {
    pub fn parse(arguments: &str) -> Result<Self, CalculatorError> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        serde_json::from_str(arguments).map_err(CalculatorError::Arguments)
    }

    /// Gender overrides the template only when it carries a value.
    fn gender_override(&self) -> Option<&Value> {
        self.gender.as_ref().filter(|v| is_set(v))
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn set_field(root: &mut Value, path: &[&str], value: Value) -> Result<(), CalculatorError> {
    let (leaf, parents) = path
        .split_last()
        .ok_or_else(|| CalculatorError::TemplateShape(String::new()))?;
    let mut node = root;
    for key in parents {
        node = node
            .get_mut(*key)
            .ok_or_else(|| CalculatorError::TemplateShape(parents.join(".")))?;
    }
    let obj = node
        .as_object_mut()
        .ok_or_else(|| CalculatorError::TemplateShape(parents.join(".")))?;
    obj.insert((*leaf).to_string(), value);
    Ok(())
}

/// Overlay the tool arguments onto the baseline template.
pub fn build_request_body(mut template: Value, args: &FuelArgs) -> Result<Value, CalculatorError> {
    set_field(&mut template, &["data", "weight"], args.weight.clone())?;
    set_field(
        &mut template,
        &["data", "environment", "raceData", "distance"],
        args.distance.clone(),
    )?;
    set_field(
        &mut template,
        &["data", "environment", "raceData", "duration"],
        args.duration.clone(),
    )?;
    if let Some(gender) = args.gender_override() {
        set_field(&mut template, &["data", "gender"], gender.clone())?;
    }
    Ok(template)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a successful simulation result as the user-facing protocol text.
pub fn render_protocol(body: &Value) -> Result<String, CalculatorError> {
    let warmup = body
        .pointer("/data/fuelingProtocol/warmUp/details/0/product")
        .ok_or(CalculatorError::MissingField("warm-up product"))?;
    let race = body
        .pointer("/data/fuelingProtocol/duringRace/details")
        .and_then(Value::as_array)
        .ok_or(CalculatorError::MissingField("race fueling details"))?;
    let carbs = body
        .pointer("/data/scalarValues/carbsPerHour")
        .ok_or(CalculatorError::MissingField("carbs per hour"))?;

    let mut output = format!(
        "You should intake a {} during warmup, roughly 30 minutes before start.\n",
        display(warmup)
    );
    for entry in race {
        let product = entry
            .get("product")
            .ok_or(CalculatorError::MissingField("race entry product"))?;
        let timing = entry
            .get("timing")
            .ok_or(CalculatorError::MissingField("race entry timing"))?;
        output.push_str(&format!(
            "Take a {} at {} km.\n",
            display(product),
            display(timing)
        ));
    }
    output.push_str(&format!(
        "Giving you an hourly intake of {} grams of carbs.",
        display(carbs)
    ));
    Ok(output)
}

#[derive(Debug, Clone)]
pub struct FuelCalculator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    template_path: PathBuf,
}

impl FuelCalculator {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        template_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            template_path: template_path.into(),
        }
    }

    pub fn from_config(cfg: &CalculatorConfig) -> Result<Self, CalculatorError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = cfg.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(Self::new(
            builder.build()?,
            cfg.endpoint.clone(),
            cfg.api_key.clone(),
            cfg.template_path.clone(),
        ))
    }

    async fn load_template(&self) -> Result<Value, CalculatorError> {
        let text = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|source| CalculatorError::TemplateRead {
                path: self.template_path.clone(),
                source,
            })?;
        serde_json::from_str(&text).map_err(CalculatorError::TemplateParse)
    }

    pub async fn fetch(&self, args: &FuelArgs) -> Result<String, CalculatorError> {
        let body = build_request_body(self.load_template().await?, args)?;
        if let Ok(payload) = serde_json::to_string(&body) {
            debug!(payload=%payload, endpoint=%self.endpoint, "sending simulation request");
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .header(HEADER_SUBSCRIPTION_KEY, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if status != StatusCode::OK {
            return Err(CalculatorError::Status(status, text));
        }
        let parsed: Value = serde_json::from_str(&text).map_err(CalculatorError::ResponseParse)?;
        render_protocol(&parsed)
    }

    /// Never fails: any error is logged and replaced with [`APOLOGY`].
    pub async fn recommend(&self, args: &FuelArgs) -> String {
        info!(
            weight = %args.weight,
            distance = %args.distance,
            duration = %args.duration,
            gender = ?args.gender,
            "fuel calculator called"
        );
        match self.fetch(args).await {
            Ok(output) => {
                debug!(output=%output, "fuel calculator result");
                output
            }
            Err(e) => {
                error!(err=%e, "fuel calculator failed");
                APOLOGY.to_string()
            }
        }
    }
}

#[async_trait::async_trait]
impl Tool for FuelCalculator {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(
            TOOL_NAME,
            "Calculates a race fueling protocol: which product to take during warm-up, which products to take at which kilometre during the race, and the resulting hourly carbohydrate intake. Use it when the athlete asks how to fuel for a race and has given their weight, the race distance and the expected duration.",
            json!({
                "type": "object",
                "properties": {
                    "weight": {"type": "number", "description": "Body weight of the athlete"},
                    "distance": {"type": "number", "description": "Race distance"},
                    "duration": {"type": "number", "description": "Expected race duration"},
                    "gender": {"type": "string", "description": "Gender of the athlete, if known"}
                },
                "required": ["weight", "distance", "duration"]
            }),
        )
    }

    async fn call(&self, arguments: &str) -> String {
        match FuelArgs::parse(arguments) {
            Ok(args) => self.recommend(&args).await,
            Err(e) => {
                error!(err=%e, arguments, "fuel calculator failed");
                APOLOGY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use tempfile::TempDir;

    const EXPECTED: &str = "You should intake a Gel A during warmup, roughly 30 minutes before start.\nTake a Gel B at 5 km.\nGiving you an hourly intake of 60 grams of carbs.";

    fn template() -> Value {
        json!({
            "version": "1",
            "data": {
                "weight": 60,
                "gender": "female",
                "environment": {
                    "temperature": 20,
                    "raceData": {"distance": 42, "duration": 10800}
                }
            }
        })
    }

    fn write_template(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("userInput.json");
        std::fs::write(&path, template().to_string()).unwrap();
        path
    }

    fn simulation_ok() -> Value {
        json!({
            "version": "2.1",
            "data": {
                "fuelingProtocol": {
                    "warmUp": {"details": [{"product": "Gel A"}]},
                    "duringRace": {"details": [{"product": "Gel B", "timing": "5"}]}
                },
                "scalarValues": {"carbsPerHour": 60}
            }
        })
    }

    fn args() -> FuelArgs {
        FuelArgs::parse(r#"{"weight":70,"distance":10,"duration":3000}"#).unwrap()
    }

    fn calculator(endpoint: String, template_path: PathBuf) -> FuelCalculator {
        FuelCalculator::new(reqwest::Client::new(), endpoint, "secret", template_path)
    }

    #[tokio::test]
    async fn renders_protocol_for_successful_simulation() {
        let dir = TempDir::new().unwrap();
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/simulationResults"),
                request::headers(contains(key("ocp-apim-subscription-key"))),
                request::body(json_decoded(eq(json!({
                    "version": "1",
                    "data": {
                        "weight": 70,
                        "gender": "female",
                        "environment": {
                            "temperature": 20,
                            "raceData": {"distance": 10, "duration": 3000}
                        }
                    }
                })))),
            ])
            .respond_with(json_encoded(simulation_ok())),
        );

        let calc = calculator(
            server.url_str("/v1/simulationResults"),
            write_template(&dir),
        );
        assert_eq!(calc.recommend(&args()).await, EXPECTED);
    }

    #[tokio::test]
    async fn non_200_status_returns_apology() {
        let dir = TempDir::new().unwrap();
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/simulationResults"))
                .respond_with(status_code(503).body("{\"error\":\"down\"}")),
        );
        let calc = calculator(
            server.url_str("/v1/simulationResults"),
            write_template(&dir),
        );
        assert_eq!(calc.recommend(&args()).await, APOLOGY);
    }

    #[tokio::test]
    async fn created_status_is_not_success() {
        let dir = TempDir::new().unwrap();
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/simulationResults"))
                .respond_with(status_code(201).body(simulation_ok().to_string())),
        );
        let calc = calculator(
            server.url_str("/v1/simulationResults"),
            write_template(&dir),
        );
        assert_eq!(calc.recommend(&args()).await, APOLOGY);
    }

    #[tokio::test]
    async fn missing_keys_return_apology() {
        let dir = TempDir::new().unwrap();
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/simulationResults"))
                .respond_with(json_encoded(json!({
                    "data": {"fuelingProtocol": {"warmUp": {"details": []}}}
                }))),
        );
        let calc = calculator(
            server.url_str("/v1/simulationResults"),
            write_template(&dir),
        );
        assert_eq!(calc.recommend(&args()).await, APOLOGY);
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_apology() {
        let dir = TempDir::new().unwrap();
        let calc = calculator(
            "http://127.0.0.1:1/v1/simulationResults".into(),
            write_template(&dir),
        );
        assert_eq!(calc.recommend(&args()).await, APOLOGY);
    }

    #[tokio::test]
    async fn missing_template_returns_apology() {
        let dir = TempDir::new().unwrap();
        let calc = calculator(
            "http://127.0.0.1:1/v1/simulationResults".into(),
            dir.path().join("absent.json"),
        );
        let err = calc.fetch(&args()).await.unwrap_err();
        assert!(matches!(err, CalculatorError::TemplateRead { .. }));
        assert_eq!(calc.recommend(&args()).await, APOLOGY);
    }

    #[tokio::test]
    async fn invalid_arguments_return_apology() {
        let dir = TempDir::new().unwrap();
        let calc = calculator(
            "http://127.0.0.1:1/v1/simulationResults".into(),
            write_template(&dir),
        );
        assert_eq!(calc.call("{not json").await, APOLOGY);
    }

    #[test]
    fn gender_is_overwritten_only_when_present() {
        let with_gender = FuelArgs::parse(
            r#"{"weight":70,"distance":10,"duration":3000,"gender":"male"}"#,
        )
        .unwrap();
        let body = build_request_body(template(), &with_gender).unwrap();
        assert_eq!(body["data"]["gender"], json!("male"));

        let body = build_request_body(template(), &args()).unwrap();
        assert_eq!(body["data"]["gender"], json!("female"));

        let empty = FuelArgs::parse(
            r#"{"weight":70,"distance":10,"duration":3000,"gender":""}"#,
        )
        .unwrap();
        let body = build_request_body(template(), &empty).unwrap();
        assert_eq!(body["data"]["gender"], json!("female"));

        let null = FuelArgs::parse(
            r#"{"weight":70,"distance":10,"duration":3000,"gender":null}"#,
        )
        .unwrap();
        let body = build_request_body(template(), &null).unwrap();
        assert_eq!(body["data"]["gender"], json!("female"));
    }

    #[test]
    fn numeric_inputs_pass_through_unchanged() {
        let args = FuelArgs::parse(r#"{"weight":70.5,"distance":"21.1","duration":5400}"#)
            .unwrap();
        let body = build_request_body(template(), &args).unwrap();
        assert_eq!(body["data"]["weight"], json!(70.5));
        assert_eq!(body["data"]["environment"]["raceData"]["distance"], json!("21.1"));
        assert_eq!(body["data"]["environment"]["raceData"]["duration"], json!(5400));
        assert_eq!(body["version"], json!("1"));
        assert_eq!(body["data"]["environment"]["temperature"], json!(20));
    }

    #[test]
    fn missing_arguments_default_to_zero() {
        let args = FuelArgs::parse("").unwrap();
        assert_eq!(args.weight, json!(0));
        assert_eq!(args.distance, json!(0));
        assert_eq!(args.duration, json!(0));
        assert!(args.gender.is_none());
    }

    #[test]
    fn template_without_race_data_is_rejected() {
        let err = build_request_body(json!({"data": {}}), &args()).unwrap_err();
        assert!(matches!(err, CalculatorError::TemplateShape(ref p) if p == "data.environment.raceData"));
    }

    #[test]
    fn renders_every_race_entry_in_order() {
        let body = json!({
            "data": {
                "fuelingProtocol": {
                    "warmUp": {"details": [{"product": "Drink Mix 160"}]},
                    "duringRace": {"details": [
                        {"product": "Gel 100", "timing": 10},
                        {"product": "Gel 100 CAF 100", "timing": 20.5}
                    ]}
                },
                "scalarValues": {"carbsPerHour": 72.5}
            }
        });
        assert_eq!(
            render_protocol(&body).unwrap(),
            "You should intake a Drink Mix 160 during warmup, roughly 30 minutes before start.\n\
             Take a Gel 100 at 10 km.\n\
             Take a Gel 100 CAF 100 at 20.5 km.\n\
             Giving you an hourly intake of 72.5 grams of carbs."
        );
    }

    #[test]
    fn definition_declares_required_inputs() {
        let calc = calculator("http://localhost".into(), PathBuf::from("x.json"));
        let def = calc.definition();
        assert_eq!(def.kind, "function");
        assert_eq!(def.function.name, TOOL_NAME);
        assert_eq!(
            def.function.parameters["required"],
            json!(["weight", "distance", "duration"])
        );
    }
}
