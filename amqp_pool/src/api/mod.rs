use self::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// macro should appear before module declaration
#[macro_use]
mod helpers {

    macro_rules! synchronous_request {
        ($channel:expr, $method:expr, $kind:path, $response:path) => {{
            let incoming = $channel.request($method, $kind).await?;
            get_expected_method!(incoming, $response)
        }};
    }

    macro_rules! get_expected_method {
        ($incoming:expr, $variant:path) => {
            match $incoming {
                $variant(method) => Ok(method),
                unexpected => Err(crate::api::error::Error::UnexpectedReply(format!(
                    "{:?}",
                    unexpected.header()
                ))),
            }
        };
    }
}

/////////////////////////////////////////////////////////////////////////////
pub mod channel;
pub mod client;
pub mod connection;
pub mod error;
