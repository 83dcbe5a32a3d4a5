/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network failure or a non-success response status.
    Transport,
    /// A stream event's payload could not be parsed into the expected
    /// shape.
    Decode,
    /// Any other errors.
    Other,
}
