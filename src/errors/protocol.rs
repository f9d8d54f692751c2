/// Modbus exception taxonomy, returned as the one-byte payload of an
/// exception response (function code with the 0x80 bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalDataAddress => write!(f, "illegal data address"),
            Self::IllegalDataValue => write!(f, "illegal data value"),
            Self::ServerDeviceFailure => write!(f, "server device failure"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::ServerDeviceBusy => write!(f, "server device busy"),
            Self::GatewayPathUnavailable => write!(f, "gateway path unavailable"),
            Self::GatewayTargetDeviceFailedToRespond => {
                write!(f, "gateway target device failed to respond")
            }
        }
    }
}

impl ProtocolErrorKind {
    pub fn to_exception_code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDeviceFailedToRespond => 0x0B,
        }
    }

    pub fn from_exception_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerDeviceBusy),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trips() {
        for kind in [
            ProtocolErrorKind::IllegalFunction,
            ProtocolErrorKind::IllegalDataAddress,
            ProtocolErrorKind::IllegalDataValue,
            ProtocolErrorKind::ServerDeviceFailure,
            ProtocolErrorKind::Acknowledge,
            ProtocolErrorKind::ServerDeviceBusy,
            ProtocolErrorKind::GatewayPathUnavailable,
            ProtocolErrorKind::GatewayTargetDeviceFailedToRespond,
        ] {
            assert_eq!(
                ProtocolErrorKind::from_exception_code(kind.to_exception_code()),
                Some(kind)
            );
        }
    }

    #[test]
    fn unknown_exception_code_is_none() {
        assert_eq!(ProtocolErrorKind::from_exception_code(0x99), None);
    }
}
