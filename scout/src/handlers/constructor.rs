//! Decodes the creation arguments recorded by the source verifier.

use crate::{errors::ErrorKind, handlers::decode};
use scout_common::{ContractSources, ContractValue};
use std::collections::BTreeMap;

/// Decodes the shell contract's constructor arguments against its verified
/// ABI. `name_args` keys the result by parameter name instead of position.
pub fn execute(sources: &ContractSources, name_args: bool) -> Result<ContractValue, ErrorKind> {
    let Some(shell) = sources.layers.first() else { return Err(ErrorKind::MissingAbi) };
    let abi = shell.abi.as_ref().ok_or(ErrorKind::MissingAbi)?;
    let constructor = abi
        .constructor
        .as_ref()
        .ok_or_else(|| ErrorKind::Handler("the verified abi has no constructor".to_string()))?;
    let arguments = shell
        .constructor_arguments
        .as_ref()
        .ok_or_else(|| ErrorKind::Handler("no recorded constructor arguments".to_string()))?;

    let kinds: Vec<_> = constructor.inputs.iter().map(|input| input.kind.clone()).collect();
    let tokens = ethers_core::abi::decode(&kinds, arguments)
        .map_err(|err| ErrorKind::Handler(format!("could not decode constructor args: {err}")))?;

    if name_args {
        Ok(ContractValue::Object(
            constructor
                .inputs
                .iter()
                .zip(tokens)
                .map(|(input, token)| (input.name.clone(), decode::token_to_value(token)))
                .collect::<BTreeMap<_, _>>(),
        ))
    } else {
        Ok(ContractValue::Array(tokens.into_iter().map(decode::token_to_value).collect()))
    }
}
