use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved marker prefix/suffix used by mutation operators to tag elements
/// they touched during the current chain pass. Markers are stripped once an
/// individual is accepted.
pub const MARKER_GUARD: &str = "__";
/// Marker set by operators on freshly inserted elements.
pub const PROP_ELEMENT_NEW: &str = "__new__";
/// Marker set by operators on modified elements.
pub const PROP_ELEMENT_MODIFIED: &str = "__modified__";
/// Network-level property accumulating the mutation history of the genome.
pub const PROP_MUTATION_HISTORY: &str = "MutationHistory";
/// Neuron role property, one of "Input", "Output" or absent (hidden).
pub const PROP_NEURON_TYPE: &str = "Type";

/// String-keyed dynamic property bag attached to individuals, networks and
/// network elements. Deliberately kept as an explicit typed key-value store:
/// it is the user-facing extensibility mechanism for tags and debug metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties {
            entries: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all internal modification markers, i.e. every property whose
    /// name is wrapped in double underscores.
    pub fn remove_markers(&mut self) {
        self.entries.retain(|k, _| {
            !(k.starts_with(MARKER_GUARD) && k.ends_with(MARKER_GUARD) && k.len() > 3)
        });
    }
}

/// A neuron of the genome network.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Neuron {
    pub id: u64,
    pub bias: f64,
    #[serde(default)]
    pub properties: Properties,
}

impl Neuron {
    pub fn is_input(&self) -> bool {
        self.properties.get(PROP_NEURON_TYPE) == Some("Input")
    }

    pub fn is_output(&self) -> bool {
        self.properties.get(PROP_NEURON_TYPE) == Some("Output")
    }

    /// Interface neurons are never removed by structural operators.
    pub fn is_interface(&self) -> bool {
        self.is_input() || self.is_output()
    }
}

/// A directed synapse of the genome network.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Synapse {
    pub id: u64,
    pub source: u64,
    pub target: u64,
    pub strength: f64,
    #[serde(default)]
    pub properties: Properties,
}

/// Minimal neural network genome: neurons, synapses and dynamic properties.
/// The full network model (modules, activation functions, ...) belongs to the
/// excluded network collaborator; the core only needs structure, element
/// properties and the `.onn` writer surface.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NeuralNetwork {
    pub neurons: Vec<Neuron>,
    pub synapses: Vec<Synapse>,
    #[serde(default)]
    pub properties: Properties,
    next_element_id: u64,
}

impl NeuralNetwork {
    pub fn new() -> Self {
        NeuralNetwork {
            neurons: Vec::new(),
            synapses: Vec::new(),
            properties: Properties::new(),
            next_element_id: 1,
        }
    }

    /// Creates an initial network with the given number of input and output
    /// neurons and no synapses.
    pub fn initial(inputs: usize, outputs: usize) -> Self {
        let mut net = NeuralNetwork::new();
        for _ in 0..inputs {
            let id = net.add_neuron(0.0);
            if let Some(n) = net.neuron_mut(id) {
                n.properties.set(PROP_NEURON_TYPE, "Input");
            }
        }
        for _ in 0..outputs {
            let id = net.add_neuron(0.0);
            if let Some(n) = net.neuron_mut(id) {
                n.properties.set(PROP_NEURON_TYPE, "Output");
            }
        }
        net
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_element_id;
        self.next_element_id += 1;
        id
    }

    pub fn add_neuron(&mut self, bias: f64) -> u64 {
        let id = self.next_id();
        self.neurons.push(Neuron {
            id,
            bias,
            properties: Properties::new(),
        });
        id
    }

    /// Adds a synapse between two existing neurons. Returns `None` if either
    /// endpoint is missing or a synapse with the same source and target
    /// already exists.
    pub fn add_synapse(&mut self, source: u64, target: u64, strength: f64) -> Option<u64> {
        if self.neuron(source).is_none() || self.neuron(target).is_none() {
            return None;
        }
        if self
            .synapses
            .iter()
            .any(|s| s.source == source && s.target == target)
        {
            return None;
        }
        let id = self.next_id();
        self.synapses.push(Synapse {
            id,
            source,
            target,
            strength,
            properties: Properties::new(),
        });
        Some(id)
    }

    /// Removes a neuron together with all synapses attached to it.
    pub fn remove_neuron(&mut self, id: u64) -> bool {
        let before = self.neurons.len();
        self.neurons.retain(|n| n.id != id);
        if self.neurons.len() == before {
            return false;
        }
        self.synapses.retain(|s| s.source != id && s.target != id);
        true
    }

    pub fn neuron(&self, id: u64) -> Option<&Neuron> {
        self.neurons.iter().find(|n| n.id == id)
    }

    pub fn neuron_mut(&mut self, id: u64) -> Option<&mut Neuron> {
        self.neurons.iter_mut().find(|n| n.id == id)
    }

    pub fn synapse_mut(&mut self, id: u64) -> Option<&mut Synapse> {
        self.synapses.iter_mut().find(|s| s.id == id)
    }

    pub fn hidden_neurons(&self) -> impl Iterator<Item = &Neuron> {
        self.neurons.iter().filter(|n| !n.is_interface())
    }

    /// Strips the reserved `__...__` modification markers from the network
    /// and from every contained element.
    pub fn remove_markers(&mut self) {
        self.properties.remove_markers();
        for neuron in &mut self.neurons {
            neuron.properties.remove_markers();
        }
        for synapse in &mut self.synapses {
            synapse.properties.remove_markers();
        }
    }

    /// Serializes the network into the `.onn` network description consumed
    /// by the external evaluator. Only the writer is owned by the core; the
    /// format itself belongs to the network IO collaborator.
    pub fn to_onn_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<net version=\"1\">\n");
        for neuron in &self.neurons {
            xml.push_str(&format!(
                "  <neuron id=\"{}\" bias=\"{}\"{}>\n",
                neuron.id,
                neuron.bias,
                match neuron.properties.get(PROP_NEURON_TYPE) {
                    Some(t) => format!(" type=\"{}\"", t),
                    None => String::new(),
                }
            ));
            for key in neuron.properties.keys() {
                if key != PROP_NEURON_TYPE {
                    xml.push_str(&format!(
                        "    <property name=\"{}\" value=\"{}\"/>\n",
                        xml_escape(key),
                        xml_escape(neuron.properties.get(key).unwrap_or(""))
                    ));
                }
            }
            xml.push_str("  </neuron>\n");
        }
        for synapse in &self.synapses {
            xml.push_str(&format!(
                "  <synapse id=\"{}\" source=\"{}\" target=\"{}\" strength=\"{}\"/>\n",
                synapse.id, synapse.source, synapse.target, synapse.strength
            ));
        }
        for key in self.properties.keys() {
            xml.push_str(&format!(
                "  <property name=\"{}\" value=\"{}\"/>\n",
                xml_escape(key),
                xml_escape(self.properties.get(key).unwrap_or(""))
            ));
        }
        xml.push_str("</net>\n");
        xml
    }
}

impl Default for NeuralNetwork {
    fn default() -> Self {
        NeuralNetwork::new()
    }
}

impl fmt::Display for NeuralNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NeuralNetwork[{} neurons, {} synapses]",
            self.neurons.len(),
            self.synapses.len()
        )
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_network_has_interface_neurons() {
        let net = NeuralNetwork::initial(3, 2);
        assert_eq!(net.neurons.len(), 5);
        assert_eq!(net.neurons.iter().filter(|n| n.is_input()).count(), 3);
        assert_eq!(net.neurons.iter().filter(|n| n.is_output()).count(), 2);
        assert_eq!(net.hidden_neurons().count(), 0);
        assert!(net.synapses.is_empty());
    }

    #[test]
    fn test_add_synapse_rejects_missing_endpoints_and_duplicates() {
        let mut net = NeuralNetwork::initial(1, 1);
        let input = net.neurons[0].id;
        let output = net.neurons[1].id;

        assert!(net.add_synapse(input, output, 0.5).is_some());
        assert!(net.add_synapse(input, output, 1.0).is_none(), "duplicate pair");
        assert!(net.add_synapse(input, 999, 1.0).is_none(), "missing target");
    }

    #[test]
    fn test_remove_neuron_removes_attached_synapses() {
        let mut net = NeuralNetwork::initial(1, 1);
        let input = net.neurons[0].id;
        let output = net.neurons[1].id;
        let hidden = net.add_neuron(0.1);
        net.add_synapse(input, hidden, 1.0);
        net.add_synapse(hidden, output, -1.0);
        net.add_synapse(input, output, 0.3);

        assert!(net.remove_neuron(hidden));
        assert_eq!(net.synapses.len(), 1);
        assert_eq!(net.synapses[0].source, input);
        assert_eq!(net.synapses[0].target, output);
    }

    #[test]
    fn test_remove_markers_strips_only_reserved_names() {
        let mut net = NeuralNetwork::initial(1, 1);
        net.properties.set("__new__", "1");
        net.properties.set("Comment", "keep me");
        let id = net.neurons[0].id;
        net.neuron_mut(id).unwrap().properties.set(PROP_ELEMENT_MODIFIED, "1");

        net.remove_markers();

        assert!(!net.properties.has("__new__"));
        assert_eq!(net.properties.get("Comment"), Some("keep me"));
        assert!(!net.neuron(id).unwrap().properties.has(PROP_ELEMENT_MODIFIED));
        // the Type property of interface neurons survives
        assert!(net.neuron(id).unwrap().properties.has(PROP_NEURON_TYPE));
    }

    #[test]
    fn test_onn_serialization_contains_elements() {
        let mut net = NeuralNetwork::initial(1, 1);
        let input = net.neurons[0].id;
        let output = net.neurons[1].id;
        net.add_synapse(input, output, 0.75);

        let xml = net.to_onn_xml();
        assert!(xml.contains("<net version=\"1\">"));
        assert!(xml.contains("type=\"Input\""));
        assert!(xml.contains("strength=\"0.75\""));
    }
}
