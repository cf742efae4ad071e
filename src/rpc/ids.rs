use std::fmt;

/// Reserved JSON-RPC ids. Each outbound request kind uses a fixed id so its response can be
/// routed to the right result schema without tracking per-request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestId {
    DefaultDisplay,
    CustomNotification,
    FilePendingNotification,
    KlipperStatus,
    PrinterStatus,
    PrintJobStatus,
    StartFilenamePrint,
}

/// How the `result` member of a response is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSchema {
    /// Plain acknowledgement, usually the string `"ok"`.
    Acknowledgement,
    /// `printer.objects.query` result.
    PrintStatus,
    /// `printer.info` result.
    KlipperInfo,
}

impl RequestId {
    pub const ALL: [RequestId; 7] = [
        RequestId::DefaultDisplay,
        RequestId::CustomNotification,
        RequestId::FilePendingNotification,
        RequestId::KlipperStatus,
        RequestId::PrinterStatus,
        RequestId::PrintJobStatus,
        RequestId::StartFilenamePrint,
    ];

    pub const fn code(self) -> u64 {
        match self {
            RequestId::DefaultDisplay => 1000,
            RequestId::CustomNotification => 2222,
            RequestId::FilePendingNotification => 2223,
            RequestId::KlipperStatus => 3330,
            RequestId::PrinterStatus => 3331,
            RequestId::PrintJobStatus => 7777,
            RequestId::StartFilenamePrint => 5555,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.code() == code)
    }

    pub const fn schema(self) -> ResultSchema {
        match self {
            RequestId::KlipperStatus => ResultSchema::KlipperInfo,
            RequestId::PrinterStatus | RequestId::PrintJobStatus => ResultSchema::PrintStatus,
            RequestId::DefaultDisplay
            | RequestId::CustomNotification
            | RequestId::FilePendingNotification
            | RequestId::StartFilenamePrint => ResultSchema::Acknowledgement,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
