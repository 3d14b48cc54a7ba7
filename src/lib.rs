/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! The core of the Matter Interaction Model:
//! attribute path expansion, attribute and cluster dispatch, invoke
//! response bookkeeping, and the secure channel / operational device
//! state machines that the IM traffic rides on.
//!
//! Cluster business logic, TLV wire encoding, crypto primitives and
//! platform bring-up are external collaborators consumed through the
//! narrow traits in `dm` and `transport`.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::uninlined_format_args)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod dm;
pub mod error;
pub mod im;
pub mod transport;
pub mod utils;
