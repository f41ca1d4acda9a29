//! Static `eth_call` extraction.

use crate::{errors::ErrorKind, handlers::decode};
use ethers_core::{
    abi::{Abi, Function, HumanReadableParser},
    types::Address,
};
use scout_common::{ContractValue, DiscoveryProvider};
use scout_config::ReturnType;

pub async fn execute(
    provider: &dyn DiscoveryProvider,
    address: Address,
    abi: Option<&Abi>,
    method: &str,
    args: &[serde_json::Value],
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, ErrorKind> {
    let function = resolve_function(abi, method)?;

    if function.inputs.len() != args.len() {
        return Err(ErrorKind::Handler(format!(
            "`{}` takes {} arguments, {} configured",
            function.name,
            function.inputs.len(),
            args.len()
        )))
    }
    let tokens = function
        .inputs
        .iter()
        .zip(args)
        .map(|(input, arg)| decode::json_to_token(arg, &input.kind))
        .collect::<Result<Vec<_>, _>>()?;

    let data = function
        .encode_input(&tokens)
        .map_err(|err| ErrorKind::Handler(err.to_string()))?;
    let ret = match provider.call(address, data.into()).await {
        Ok(ret) => ret,
        Err(err) if err.is_revert() => {
            return Err(ErrorKind::Handler(format!("`{}` reverted", function.name)))
        }
        Err(err) => return Err(ErrorKind::Rpc(err.to_string())),
    };

    let tokens = function
        .decode_output(&ret)
        .map_err(|err| ErrorKind::Handler(format!("could not decode output: {err}")))?;
    Ok(coerce(decode::tokens_to_value(tokens), return_type))
}

/// Finds the method: a full human-readable signature stands on its own,
/// a bare name needs the verified ABI.
pub(crate) fn resolve_function(abi: Option<&Abi>, method: &str) -> Result<Function, ErrorKind> {
    if method.contains('(') {
        let signature = if method.trim_start().starts_with("function") {
            method.to_string()
        } else {
            format!("function {method}")
        };
        return HumanReadableParser::parse_function(&signature)
            .map_err(|err| ErrorKind::Handler(format!("invalid method signature: {err}")))
    }

    let abi = abi.ok_or(ErrorKind::MissingAbi)?;
    abi.function(method)
        .cloned()
        .map_err(|_| ErrorKind::Handler(format!("no method `{method}` in the verified abi")))
}

fn coerce(value: ContractValue, return_type: Option<&ReturnType>) -> ContractValue {
    match (return_type, &value) {
        (Some(ReturnType::Address), ContractValue::Number(n)) => {
            let mut word = [0u8; 32];
            n.to_big_endian(&mut word);
            ContractValue::Address(Address::from_slice(&word[12..]))
        }
        (Some(ReturnType::Bool), ContractValue::Number(n)) => ContractValue::Bool(!n.is_zero()),
        _ => value,
    }
}
