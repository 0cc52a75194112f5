//! Conversion of `mongodb` errors into layer errors.

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use mgolayer_core::error::{DriverError, MgoError};

fn server_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        _ => None,
    }
}

/// Converts a `mongodb` error, keeping its server code and labels.
pub fn convert_error(err: MongoError) -> MgoError {
    match err.kind.as_ref() {
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            MgoError::Serialization(err.to_string())
        }
        _ => {
            let mut converted = DriverError::new(err.to_string());
            converted.code = server_code(&err);
            converted.labels = err.labels().iter().cloned().collect();
            converted.labels.sort();
            MgoError::Driver(converted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlabelled_errors_convert_without_code() {
        let err = MongoError::custom("boom");
        let converted = convert_error(err);
        assert!(matches!(converted, MgoError::Driver(DriverError { code: None, .. })));
        assert!(!converted.has_label("TransientTransactionError"));
    }
}
