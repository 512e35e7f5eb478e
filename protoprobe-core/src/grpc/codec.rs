//! # JSON <-> Protobuf Codec
//!
//! Implements `tonic::codec::Codec` so `tonic` can carry `serde_json::Value` directly.
//!
//! * **Encoding**: the JSON value is checked against the request `MessageDescriptor` by
//!   deserializing it into a `DynamicMessage`, which is then written to the gRPC buffer.
//! * **Decoding**: the wire bytes are merged into a `DynamicMessage` of the response type
//!   and turned back into JSON.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// Codec holding the request and response schemas of one method.
pub struct JsonCodec {
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl JsonCodec {
    pub fn new(input: MessageDescriptor, output: MessageDescriptor) -> Self {
        Self { input, output }
    }

    pub fn for_method(method: &MethodDescriptor) -> Self {
        Self::new(method.input(), method.output())
    }
}

impl Codec for JsonCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(self.input.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(self.output.clone())
    }
}

pub struct JsonEncoder(MessageDescriptor);

impl Encoder for JsonEncoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let message = DynamicMessage::deserialize(self.0.clone(), item).map_err(|e| {
            Status::invalid_argument(format!(
                "Request body does not match message '{}': {}",
                self.0.full_name(),
                e
            ))
        })?;

        message.encode_raw(dst);
        Ok(())
    }
}

pub struct JsonDecoder(MessageDescriptor);

impl Decoder for JsonDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.0.clone());
        message
            .merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        let value = serde_json::to_value(&message)
            .map_err(|e| Status::internal(format!("Failed to map response to JSON: {}", e)))?;

        Ok(Some(value))
    }
}
