use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::device::DeviceReading;
use crate::installation_config::InstallationConfig;
use crate::telemetry::{AccessToken, TelemetrySource};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TOKEN_PATH: &str = "/account/v1.0/token";
const STATION_REALTIME_PATH: &str = "/station/v1.0/realTime";
const DEVICE_CURRENT_DATA_PATH: &str = "/device/v1.0/currentData";

/// Solarman OpenAPI client. One request per call, no retries.
pub struct SolarmanApi {
    client: Client,
}

impl SolarmanApi {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(format!("could not build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn post<B: Serialize + ?Sized>(
        &self,
        url: String,
        body: &B,
        token: Option<&AccessToken>,
    ) -> std::result::Result<Value, String> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = token {
            request = request.header("Authorization", format!("bearer {}", token.as_str()));
        }
        let response = request.send().map_err(|e| e.without_url().to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("server responded {status}"));
        }
        response
            .json::<Value>()
            .map_err(|e| format!("undecodable response: {}", e.without_url()))
    }

    fn fetch_reading(
        &self,
        url: String,
        body: Value,
        token: &AccessToken,
        what: &str,
    ) -> Result<DeviceReading> {
        let value = self
            .post(url, &body, Some(token))
            .map_err(|e| Error::Fetch(format!("{what}: {e}")))?;
        into_reading(value).map_err(|e| Error::Fetch(format!("{what}: {e}")))
    }
}

/// Prepends `https://` to a bare API host.
pub fn base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

fn api_message(value: &Value) -> String {
    value
        .get("msg")
        .and_then(Value::as_str)
        .filter(|msg| !msg.is_empty())
        .unwrap_or("no message")
        .to_string()
}

/// Accepts a response body as a reading unless the API flagged it as failed.
fn into_reading(value: Value) -> std::result::Result<DeviceReading, String> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(format!("API reported failure: {}", api_message(&value)));
    }
    match value {
        Value::Object(reading) => Ok(reading),
        other => Err(format!("expected a JSON object, got {other}")),
    }
}

impl TelemetrySource for SolarmanApi {
    fn authenticate(&self, config: &InstallationConfig) -> Result<AccessToken> {
        let url = format!(
            "{}{TOKEN_PATH}?appId={}&language=en",
            base_url(&config.url),
            config.appid
        );
        let body = json!({
            "appSecret": config.secret,
            "email": config.username,
            "password": config.passhash,
        });
        let value = self
            .post(url, &body, None)
            .map_err(|e| Error::Auth(format!("{}: {e}", config.name)))?;
        match value.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => Err(Error::Auth(format!(
                "{}: response lacks access_token ({})",
                config.name,
                api_message(&value)
            ))),
        }
    }

    fn station_realtime(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
    ) -> Result<DeviceReading> {
        debug!("Fetching realtime data of station {}", config.station_id);
        let url = format!("{}{STATION_REALTIME_PATH}?language=en", base_url(&config.url));
        self.fetch_reading(
            url,
            json!({ "stationId": config.station_id }),
            token,
            &format!("station {}", config.station_id),
        )
    }

    fn device_current_data(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
        device_sn: &str,
    ) -> Result<DeviceReading> {
        debug!("Fetching current data of device {device_sn}");
        let url = format!(
            "{}{DEVICE_CURRENT_DATA_PATH}?language=en",
            base_url(&config.url)
        );
        self.fetch_reading(
            url,
            json!({ "deviceSn": device_sn }),
            token,
            &format!("device {device_sn}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_config::MqttConfig;
    use mockito::{Matcher, Server};

    fn config(url: String) -> InstallationConfig {
        InstallationConfig {
            name: "roof".into(),
            url,
            appid: "123456789012345".into(),
            secret: "0123456789abcdef0123456789abcdef".into(),
            username: "pv@example.com".into(),
            passhash: "a".repeat(64),
            station_id: 1234567,
            inverter_id: "2101234567".into(),
            logger_id: "4123456789".into(),
            meter_id: None,
            debug: false,
            mqtt: MqttConfig {
                broker: "localhost".into(),
                port: 1883,
                topic: "solar".into(),
                username: None,
                password: None,
                client_id: None,
                tls: None,
            },
        }
    }

    #[test]
    fn bare_host_gets_https_scheme() {
        assert_eq!(
            base_url("globalapi.solarmanpv.com"),
            "https://globalapi.solarmanpv.com"
        );
        assert_eq!(base_url("http://127.0.0.1:1234/"), "http://127.0.0.1:1234");
    }

    #[test]
    fn authenticate_posts_credentials_and_returns_token() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("appId".into(), "123456789012345".into()),
                Matcher::UrlEncoded("language".into(), "en".into()),
            ]))
            .match_body(Matcher::Json(json!({
                "appSecret": "0123456789abcdef0123456789abcdef",
                "email": "pv@example.com",
                "password": "a".repeat(64),
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok-1", "token_type": "bearer", "success": true}"#)
            .create();

        let api = SolarmanApi::new().unwrap();
        let token = api.authenticate(&config(server.url())).unwrap();

        assert_eq!(token.as_str(), "tok-1");
        mock.assert();
    }

    #[test]
    fn missing_token_is_an_auth_error() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": "2101019", "msg": "the account or password is incorrect", "success": false}"#)
            .create();

        let api = SolarmanApi::new().unwrap();
        let err = api.authenticate(&config(server.url())).unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("incorrect"));
        mock.assert();
    }

    #[test]
    fn device_current_data_sends_bearer_token() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", DEVICE_CURRENT_DATA_PATH)
            .match_query(Matcher::UrlEncoded("language".into(), "en".into()))
            .match_header("authorization", "bearer tok-1")
            .match_body(Matcher::Json(json!({"deviceSn": "2101234567"})))
            .with_status(200)
            .with_body(r#"{"code": "0", "success": true, "deviceState": 1, "dataList": []}"#)
            .create();

        let api = SolarmanApi::new().unwrap();
        let reading = api
            .device_current_data(&config(server.url()), &AccessToken::new("tok-1"), "2101234567")
            .unwrap();

        assert_eq!(reading["deviceState"], json!(1));
        mock.assert();
    }

    #[test]
    fn station_realtime_posts_station_id() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", STATION_REALTIME_PATH)
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({"stationId": 1234567})))
            .with_status(200)
            .with_body(r#"{"success": true, "generationPower": 812.0}"#)
            .create();

        let api = SolarmanApi::new().unwrap();
        let reading = api
            .station_realtime(&config(server.url()), &AccessToken::new("tok-1"))
            .unwrap();

        assert_eq!(reading["generationPower"], json!(812.0));
        mock.assert();
    }

    #[test]
    fn http_error_is_a_fetch_error() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", STATION_REALTIME_PATH)
            .match_query(Matcher::Any)
            .with_status(502)
            .create();

        let api = SolarmanApi::new().unwrap();
        let result = api.station_realtime(&config(server.url()), &AccessToken::new("t"));
        assert!(matches!(result, Err(Error::Fetch(_))));
    }

    #[test]
    fn unsuccessful_or_non_object_bodies_are_fetch_errors() {
        assert!(into_reading(json!({"success": false, "msg": "rate limited"})).is_err());
        assert!(into_reading(json!([1, 2, 3])).is_err());
        assert!(into_reading(json!({"deviceState": 2})).is_ok());
    }
}
