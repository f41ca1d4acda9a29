//! Iterates a numeric-indexed getter (`function owners(uint256)` style)
//! until it reverts or the configured length is reached.

use crate::{
    errors::ErrorKind,
    handlers::{call::resolve_function, decode},
};
use ethers_core::{abi::Abi, abi::Token, types::Address};
use scout_common::{ContractValue, DiscoveryProvider};

/// Upper bound on unbounded iteration; a getter that never reverts below
/// this is treated as a handler failure rather than looping forever.
pub const MAX_UNBOUNDED_LENGTH: u64 = 4096;

pub async fn execute(
    provider: &dyn DiscoveryProvider,
    address: Address,
    abi: Option<&Abi>,
    method: &str,
    start_index: u64,
    length: Option<u64>,
) -> Result<ContractValue, ErrorKind> {
    let function = resolve_function(abi, method)?;
    if function.inputs.len() != 1 {
        return Err(ErrorKind::Handler(format!(
            "`{}` is not a single-index getter",
            function.name
        )))
    }

    let mut values = Vec::new();
    let mut index = start_index;
    loop {
        if let Some(length) = length {
            if values.len() as u64 >= length {
                break;
            }
        } else if values.len() as u64 >= MAX_UNBOUNDED_LENGTH {
            return Err(ErrorKind::Handler(format!(
                "`{}` did not terminate after {MAX_UNBOUNDED_LENGTH} entries",
                function.name
            )))
        }

        let data = function
            .encode_input(&[Token::Uint(index.into())])
            .map_err(|err| ErrorKind::Handler(err.to_string()))?;
        let ret = match provider.call(address, data.into()).await {
            Ok(ret) => ret,
            // the getter reverting marks the end of the array
            Err(err) if err.is_revert() => break,
            Err(err) => return Err(ErrorKind::Rpc(err.to_string())),
        };

        let tokens = function
            .decode_output(&ret)
            .map_err(|err| ErrorKind::Handler(format!("could not decode output: {err}")))?;
        values.push(decode::tokens_to_value(tokens));
        index += 1;
    }

    Ok(ContractValue::Array(values))
}
