// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Managed Search Engine (spec.md §4.5): distributed query issuance,
//! query-key acquisition, and result aggregation.

pub mod managed_search;
pub mod manager;

pub use managed_search::{HitIngestOutcome, ManagedSearch, SearchState};
pub use manager::SearchManager;
