//! JSON-RPC envelope codec for the printer connection.
//!
//! Requests, responses and notifications share one socket, so inbound frames are first
//! classified by which of `id`/`method`/`result`/`error` they carry, and a response's
//! `result` is only decoded once its `id` has been looked up in [`RequestId`]'s schema table.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ids::{RequestId, ResultSchema};
use super::types::{KlipperInfo, StatusQueryResult};
use crate::error::{FleetError, Result};

pub const PROTOCOL_VERSION: &str = "2.0";

pub const NOTIFY_GCODE_RESPONSE: &str = "notify_gcode_response";
pub const NOTIFY_PROC_STAT_UPDATE: &str = "notify_proc_stat_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "printer.gcode.script")]
    GcodeScript,
    #[serde(rename = "printer.print.start")]
    PrintStart,
    #[serde(rename = "printer.objects.query")]
    ObjectsQuery,
    #[serde(rename = "printer.info")]
    Info,
}

/// Field-selection mask for `printer.objects.query`. Every value is `null`: it names the
/// objects to report, it carries no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMask {
    pub webhooks: (),
    pub virtual_sdcard: (),
    pub print_stats: (),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Script { script: String },
    Filename { filename: String },
    Objects { objects: ObjectMask },
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    pub id: u64,
}

impl Request {
    fn new(id: RequestId, method: Method, params: Option<Params>) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            method,
            params,
            id: id.code(),
        }
    }

    /// `printer.gcode.script` running a raw G-code macro.
    pub fn gcode_script(id: RequestId, script: impl Into<String>) -> Self {
        Self::new(
            id,
            Method::GcodeScript,
            Some(Params::Script {
                script: script.into(),
            }),
        )
    }

    pub fn start_print(filename: impl Into<String>) -> Self {
        Self::new(
            RequestId::StartFilenamePrint,
            Method::PrintStart,
            Some(Params::Filename {
                filename: filename.into(),
            }),
        )
    }

    pub fn objects_query(id: RequestId) -> Self {
        Self::new(
            id,
            Method::ObjectsQuery,
            Some(Params::Objects {
                objects: ObjectMask::default(),
            }),
        )
    }

    pub fn printer_info() -> Self {
        Self::new(RequestId::KlipperStatus, Method::Info, None)
    }

    pub fn request_id(&self) -> Option<RequestId> {
        RequestId::from_code(self.id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Decoded `result` of a response, shaped by the schema of its request id.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseResult {
    Acknowledged(Value),
    PrintStatus(StatusQueryResult),
    KlipperInfo(KlipperInfo),
    /// The id is not one of ours; kept raw for diagnostics.
    Unrouted(Value),
}

impl ResponseResult {
    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            ResponseResult::Acknowledged(v) | ResponseResult::Unrouted(v) => v.clone(),
            ResponseResult::PrintStatus(status) => serde_json::to_value(status)?,
            ResponseResult::KlipperInfo(info) => serde_json::to_value(info)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Console lines echoed by the firmware.
    GcodeResponse(Vec<String>),
    /// Periodic host telemetry.
    ProcStatUpdate(Value),
    Other { method: String, params: Option<Value> },
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request {
        id: u64,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: u64,
        result: ResponseResult,
    },
    ErrorResponse {
        id: Option<u64>,
        error: RpcError,
    },
    Notification(Notification),
}

#[derive(Deserialize)]
struct RawEnvelope {
    method: Option<String>,
    id: Option<Value>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

fn malformed(reason: impl Into<String>) -> FleetError {
    FleetError::MalformedEnvelope(reason.into())
}

/// Decode one inbound frame.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let RawEnvelope {
        method,
        id,
        params,
        result,
        error,
    } = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;

    let id = id.as_ref().map(parse_id).transpose()?;

    match (id, method, result, error) {
        (id, _, None, Some(error)) => Ok(Envelope::ErrorResponse { id, error }),
        (Some(id), None, Some(result), None) => Ok(Envelope::Response {
            id,
            result: decode_result(id, result)?,
        }),
        (Some(id), Some(method), None, None) => Ok(Envelope::Request { id, method, params }),
        (None, Some(method), None, None) => {
            Ok(Envelope::Notification(decode_notification(method, params)?))
        }
        (None, _, Some(_), _) => Err(malformed("result without id")),
        _ => Err(malformed("no recognizable request/response/notification shape")),
    }
}

fn parse_id(value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| malformed(format!("id is not an unsigned integer: {value}")))
}

fn decode_result(id: u64, result: Value) -> Result<ResponseResult> {
    let Some(request_id) = RequestId::from_code(id) else {
        return Ok(ResponseResult::Unrouted(result));
    };
    match request_id.schema() {
        ResultSchema::Acknowledgement => Ok(ResponseResult::Acknowledged(result)),
        ResultSchema::PrintStatus => serde_json::from_value(result)
            .map(ResponseResult::PrintStatus)
            .map_err(|e| malformed(format!("status result for id {id}: {e}"))),
        ResultSchema::KlipperInfo => serde_json::from_value(result)
            .map(ResponseResult::KlipperInfo)
            .map_err(|e| malformed(format!("klipper info for id {id}: {e}"))),
    }
}

fn decode_notification(method: String, params: Option<Value>) -> Result<Notification> {
    match method.as_str() {
        NOTIFY_GCODE_RESPONSE => {
            let lines: Vec<String> = serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(|e| malformed(format!("{NOTIFY_GCODE_RESPONSE} params: {e}")))?;
            Ok(Notification::GcodeResponse(lines))
        }
        NOTIFY_PROC_STAT_UPDATE => Ok(Notification::ProcStatUpdate(
            params.unwrap_or(Value::Null),
        )),
        _ => Ok(Notification::Other { method, params }),
    }
}

/// Encode an envelope back to its wire form.
pub fn encode(envelope: &Envelope) -> Result<String> {
    let value = match envelope {
        Envelope::Request { id, method, params } => {
            let mut v = json!({"jsonrpc": PROTOCOL_VERSION, "method": method, "id": id});
            if let Some(params) = params {
                v["params"] = params.clone();
            }
            v
        }
        Envelope::Response { id, result } => {
            json!({"jsonrpc": PROTOCOL_VERSION, "id": id, "result": result.to_value()?})
        }
        Envelope::ErrorResponse { id, error } => {
            let mut v = json!({"jsonrpc": PROTOCOL_VERSION, "error": serde_json::to_value(error)?});
            if let Some(id) = id {
                v["id"] = json!(id);
            }
            v
        }
        Envelope::Notification(notification) => {
            let (method, params) = match notification {
                Notification::GcodeResponse(lines) => {
                    (NOTIFY_GCODE_RESPONSE, Some(serde_json::to_value(lines)?))
                }
                Notification::ProcStatUpdate(params) => {
                    (NOTIFY_PROC_STAT_UPDATE, Some(params.clone()))
                }
                Notification::Other { method, params } => (method.as_str(), params.clone()),
            };
            let mut v = json!({"jsonrpc": PROTOCOL_VERSION, "method": method});
            if let Some(params) = params {
                v["params"] = params;
            }
            v
        }
    };
    Ok(serde_json::to_string(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::{PrintStats, PrinterObjects, VirtualSdcard, Webhooks};

    fn as_value(req: &Request) -> Value {
        serde_json::from_str(&req.to_json().unwrap()).unwrap()
    }

    fn sample_status(state: &str) -> StatusQueryResult {
        StatusQueryResult {
            eventtime: 1234.5,
            status: PrinterObjects {
                webhooks: Webhooks {
                    state: "ready".into(),
                    state_message: "Printer is ready".into(),
                },
                virtual_sdcard: VirtualSdcard {
                    progress: 0.5,
                    is_active: true,
                    file_position: 2048,
                    file_path: Some("/gcodes/testing.gcode".into()),
                },
                print_stats: PrintStats {
                    print_duration: 60.0,
                    total_duration: 65.0,
                    filament_used: 12.25,
                    filename: "testing.gcode".into(),
                    state: state.into(),
                    message: String::new(),
                },
            },
        }
    }

    #[test]
    fn objects_query_sends_null_mask() {
        let req = Request::objects_query(RequestId::PrintJobStatus);
        assert_eq!(
            as_value(&req),
            json!({
                "jsonrpc": "2.0",
                "method": "printer.objects.query",
                "params": {"objects": {"webhooks": null, "virtual_sdcard": null, "print_stats": null}},
                "id": 7777
            })
        );
    }

    #[test]
    fn gcode_script_and_start_print_shapes() {
        let req = Request::gcode_script(RequestId::DefaultDisplay, "DISPLAY_DEFAULT");
        assert_eq!(
            as_value(&req),
            json!({"jsonrpc": "2.0", "method": "printer.gcode.script", "params": {"script": "DISPLAY_DEFAULT"}, "id": 1000})
        );

        let req = Request::start_print("testing.gcode");
        assert_eq!(
            as_value(&req),
            json!({"jsonrpc": "2.0", "method": "printer.print.start", "params": {"filename": "testing.gcode"}, "id": 5555})
        );
        assert_eq!(req.request_id(), Some(RequestId::StartFilenamePrint));
    }

    #[test]
    fn printer_info_has_no_params() {
        let v = as_value(&Request::printer_info());
        assert_eq!(v, json!({"jsonrpc": "2.0", "method": "printer.info", "id": 3330}));
    }

    #[test]
    fn request_deserializes_back() {
        let req = Request::objects_query(RequestId::PrinterStatus);
        let parsed: Request = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn decode_status_response() {
        let frame = r#"{"jsonrpc":"2.0","id":7777,"result":{"eventtime":1.5,"status":{"print_stats":{"state":"completed"}}}}"#;
        match decode(frame.as_bytes()).unwrap() {
            Envelope::Response {
                id: 7777,
                result: ResponseResult::PrintStatus(status),
            } => assert_eq!(status.print_state(), "completed"),
            other => panic!("expected status response, got {other:?}"),
        }
    }

    #[test]
    fn decode_klipper_info_response() {
        let frame = r#"{"jsonrpc":"2.0","id":3330,"result":{"state":"ready","hostname":"voron","software_version":"v0.12.0"}}"#;
        match decode(frame.as_bytes()).unwrap() {
            Envelope::Response {
                result: ResponseResult::KlipperInfo(info),
                ..
            } => {
                assert_eq!(info.hostname, "voron");
                assert_eq!(info.state, "ready");
            }
            other => panic!("expected klipper info, got {other:?}"),
        }
    }

    #[test]
    fn decode_ack_and_unrouted() {
        let ack = decode(br#"{"jsonrpc":"2.0","id":5555,"result":"ok"}"#).unwrap();
        assert_eq!(
            ack,
            Envelope::Response {
                id: 5555,
                result: ResponseResult::Acknowledged(json!("ok"))
            }
        );
        let other = decode(br#"{"jsonrpc":"2.0","id":42,"result":{"x":1}}"#).unwrap();
        assert_eq!(
            other,
            Envelope::Response {
                id: 42,
                result: ResponseResult::Unrouted(json!({"x": 1}))
            }
        );
    }

    #[test]
    fn decode_gcode_response_notification() {
        let frame = r#"{"jsonrpc":"2.0","method":"notify_gcode_response","params":["// IdleFlag:1.0"]}"#;
        assert_eq!(
            decode(frame.as_bytes()).unwrap(),
            Envelope::Notification(Notification::GcodeResponse(vec!["// IdleFlag:1.0".into()]))
        );
    }

    #[test]
    fn decode_proc_stat_and_other_notifications() {
        let frame = r#"{"jsonrpc":"2.0","method":"notify_proc_stat_update","params":[{"cpu_temp":45.1}]}"#;
        assert!(matches!(
            decode(frame.as_bytes()).unwrap(),
            Envelope::Notification(Notification::ProcStatUpdate(_))
        ));
        let frame = r#"{"jsonrpc":"2.0","method":"notify_klippy_ready"}"#;
        assert_eq!(
            decode(frame.as_bytes()).unwrap(),
            Envelope::Notification(Notification::Other {
                method: "notify_klippy_ready".into(),
                params: None
            })
        );
    }

    #[test]
    fn decode_error_response() {
        let frame = r#"{"jsonrpc":"2.0","id":5555,"error":{"code":400,"message":"File not found"}}"#;
        match decode(frame.as_bytes()).unwrap() {
            Envelope::ErrorResponse { id, error } => {
                assert_eq!(id, Some(5555));
                assert_eq!(error.code, 400);
                assert_eq!(error.message, "File not found");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn decode_inbound_request() {
        let frame = r#"{"jsonrpc":"2.0","method":"server.ping","id":9}"#;
        assert_eq!(
            decode(frame.as_bytes()).unwrap(),
            Envelope::Request {
                id: 9,
                method: "server.ping".into(),
                params: None
            }
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let frames: &[&[u8]] = &[
            b"",
            b"not json at all",
            b"[1, 2, 3]",
            br#"{"jsonrpc":"2.0"}"#,
            br#"{"jsonrpc":"2.0","result":"ok"}"#,
            br#"{"jsonrpc":"2.0","id":"abc","result":"ok"}"#,
            br#"{"jsonrpc":"2.0","id":-4,"result":"ok"}"#,
            br#"{"jsonrpc":"2.0","id":7777,"result":"ok"}"#,
            br#"{"jsonrpc":"2.0","id":3330,"result":[1]}"#,
            br#"{"jsonrpc":"2.0","method":"notify_gcode_response","params":{"line":"x"}}"#,
            br#"{"jsonrpc":"2.0","id":1,"error":{"message":"no code"}}"#,
            &[0xff, 0xfe, 0x00],
        ];
        for frame in frames {
            let err = decode(frame).unwrap_err();
            assert!(
                matches!(err, FleetError::MalformedEnvelope(_)),
                "frame {:?} gave {err:?}",
                String::from_utf8_lossy(frame)
            );
        }
    }

    #[test]
    fn recognized_results_round_trip() {
        let envelopes = vec![
            Envelope::Response {
                id: RequestId::PrintJobStatus.code(),
                result: ResponseResult::PrintStatus(sample_status("printing")),
            },
            Envelope::Response {
                id: RequestId::PrinterStatus.code(),
                result: ResponseResult::PrintStatus(sample_status("standby")),
            },
            Envelope::Response {
                id: RequestId::KlipperStatus.code(),
                result: ResponseResult::KlipperInfo(KlipperInfo {
                    state: "ready".into(),
                    hostname: "voron".into(),
                    software_version: "v0.12.0".into(),
                    klipper_path: "/home/pi/klipper".into(),
                    config_file: "/home/pi/printer.cfg".into(),
                    ..Default::default()
                }),
            },
            Envelope::Response {
                id: RequestId::StartFilenamePrint.code(),
                result: ResponseResult::Acknowledged(json!("ok")),
            },
            Envelope::ErrorResponse {
                id: Some(RequestId::StartFilenamePrint.code()),
                error: RpcError {
                    code: 400,
                    message: "busy".into(),
                    data: None,
                },
            },
            Envelope::Notification(Notification::GcodeResponse(vec![
                "// IdleFlag:0.0".into(),
            ])),
        ];
        for envelope in envelopes {
            let wire = encode(&envelope).unwrap();
            assert_eq!(decode(wire.as_bytes()).unwrap(), envelope, "wire: {wire}");
        }
    }
}
